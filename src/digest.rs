use std::{
    fmt,
    io::{self, Read},
};

use sha2::Digest as _;

/// Algorithm to compute the hash value.
///
/// See [`Digest`] for an example.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DigestAlgorithm {
    SHA256,
    SHA512,
}

impl DigestAlgorithm {
    /// Name of the algorithm, as it appears before the `:` in a digest.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::SHA256 => "sha256",
            DigestAlgorithm::SHA512 => "sha512",
        }
    }

    /// Length of the encoded hash value.
    fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::SHA256 => 256 / 8 * 2,
            DigestAlgorithm::SHA512 => 512 / 8 * 2,
        }
    }

    fn hasher(&self) -> Box<dyn digest::DynDigest> {
        match self {
            DigestAlgorithm::SHA256 => Box::new(sha2::Sha256::new()),
            DigestAlgorithm::SHA512 => Box::new(sha2::Sha512::new()),
        }
    }
}

/// Content address of a blob or manifest.
///
/// It contains the algorithm (like `SHA256`) and the hash value as
/// a lowercase hexadecimal string.
///
/// # Examples
///
/// ```
/// # use oci_referrers::*;
/// const DIGEST: &str = "123456789012345678901234567890123456789012345678901234567890abcd";
///
/// let digest = Digest::try_from(format!("sha256:{}", DIGEST)).unwrap();
/// assert_eq!(digest.algorithm(), DigestAlgorithm::SHA256);
/// assert_eq!(digest.hash_value(), DIGEST);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    hash: String,
    algorithm: DigestAlgorithm,
}

/// Errors from the digest parser.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DigestError {
    #[error("Invalid digest algorithm.")]
    InvalidAlgorithm,

    #[error("Invalid digest value.")]
    InvalidValue,
}

impl Digest {
    /// Compute the digest of `data`.
    ///
    /// ```
    /// # use oci_referrers::*;
    /// let digest = Digest::compute(DigestAlgorithm::SHA256, b"abc");
    /// assert_eq!(
    ///     digest.source(),
    ///     "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    /// );
    /// ```
    pub fn compute(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        let value = match algorithm {
            DigestAlgorithm::SHA256 => HexString(sha2::Sha256::digest(data)).to_string(),
            DigestAlgorithm::SHA512 => HexString(sha2::Sha512::digest(data)).to_string(),
        };

        Digest {
            hash: format!("{}:{value}", algorithm.as_str()),
            algorithm,
        }
    }

    /// Shortcut for `Digest::compute(DigestAlgorithm::SHA256, data)`.
    pub fn sha256(data: &[u8]) -> Self {
        Self::compute(DigestAlgorithm::SHA256, data)
    }

    /// Original string to build this instance (`algorithm:hash_value`).
    pub fn source(&self) -> &str {
        &self.hash
    }

    pub fn hash_value(&self) -> &str {
        self.hash
            .split_once(':')
            .map(|(_, h)| h)
            .unwrap_or_default()
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Return a `Read` instance to compute its digest.
    ///
    /// When all data from `reader` is consumed, it verifies that the
    /// computed digest is the expected one. If not, it returns an
    /// [`InvalidData`](::std::io::ErrorKind::InvalidData)
    /// error.
    pub fn wrap_reader<R: Read>(&self, reader: R) -> impl Read {
        DigestReader {
            hasher: self.algorithm.hasher(),
            expected: self.hash_value().to_owned(),
            reader,
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(hash: String) -> Result<Self, Self::Error> {
        let (algorithm, value) = match hash.split_once(':') {
            Some(("sha256", v)) => (DigestAlgorithm::SHA256, v),
            Some(("sha512", v)) => (DigestAlgorithm::SHA512, v),
            _ => return Err(DigestError::InvalidAlgorithm),
        };

        // Registered algorithms are encoded as lowercase hex.
        let valid = value.len() == algorithm.hex_len()
            && value.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f'));

        if valid {
            Ok(Digest { hash, algorithm })
        } else {
            Err(DigestError::InvalidValue)
        }
    }
}

impl TryFrom<&str> for Digest {
    type Error = DigestError;

    fn try_from(hash: &str) -> Result<Self, Self::Error> {
        Digest::try_from(hash.to_owned())
    }
}

struct DigestReader<R> {
    hasher: Box<dyn digest::DynDigest>,
    expected: String,
    reader: R,
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let buf_len = buf.len();
        let n = self.reader.read(buf)?;

        if n == 0 && buf_len > 0 {
            // On EOF, compare the computed digest with the expected one.
            return self.check_hash();
        }

        self.hasher.update(&buf[..n]);

        Ok(n)
    }
}

impl<R> DigestReader<R> {
    fn check_hash(&mut self) -> io::Result<usize> {
        const MAX_DIGEST_SIZE: usize = 512 / 8;

        let mut buffer = [0u8; MAX_DIGEST_SIZE];
        let out = &mut buffer[..self.hasher.output_size()];

        self.hasher
            .finalize_into_reset(out)
            .map_err(io::Error::other)?;

        let computed = HexString(&*out).to_string();
        if computed != self.expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid digest. Expected {}, got {computed}.", self.expected),
            ));
        }

        Ok(0)
    }
}

/// Encode a byte buffer as a lowercase hex string.
pub(crate) struct HexString<T>(pub T);

impl<T: AsRef<[u8]>> fmt::Display for HexString<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0
            .as_ref()
            .iter()
            .try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}

#[test]
fn encode_hex_bytes() {
    assert_eq!(HexString(b"\x01\x20\xf0").to_string(), "0120f0");
}

#[test]
fn parse_digests() {
    let sha512 = Digest::compute(DigestAlgorithm::SHA512, b"\x01\x02");
    assert_eq!(sha512.hash_value().len(), 128);
    assert_eq!(Digest::try_from(sha512.source()), Ok(sha512.clone()));

    assert_eq!(
        Digest::try_from("md5:d41d8cd98f00b204e9800998ecf8427e"),
        Err(DigestError::InvalidAlgorithm)
    );

    assert_eq!(Digest::try_from("sha256"), Err(DigestError::InvalidAlgorithm));
    assert_eq!(Digest::try_from("sha256:0000"), Err(DigestError::InvalidValue));

    // Uppercase hex is not canonical.
    let upper = Digest::sha256(b"x").hash_value().to_ascii_uppercase();
    assert_eq!(
        Digest::try_from(format!("sha256:{upper}")),
        Err(DigestError::InvalidValue)
    );
}

#[test]
fn reject_invalid_digest() {
    use std::io::Cursor;

    /// Digest for `abc`
    const DIGEST: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    let digest = Digest::try_from(format!("sha256:{DIGEST}")).unwrap();
    let mut output = Vec::new();

    // Accept a valid digest.
    digest
        .wrap_reader(Cursor::new("abc"))
        .read_to_end(&mut output)
        .unwrap();

    assert_eq!(output, b"abc");

    // Reject an invalid digest.
    output.clear();
    let err = digest
        .wrap_reader(Cursor::new("abcx"))
        .read_to_end(&mut output)
        .unwrap_err();

    assert_eq!(err.kind(), io::ErrorKind::InvalidData);

    let msg = err.into_inner().unwrap().to_string().to_lowercase();
    assert!(msg.contains(DIGEST));
    assert!(msg.contains("7571ce1f8e21c6b13dd7ec2c5ec7c9e4dd9852e209869511853f2f1f74b17927"));
}
