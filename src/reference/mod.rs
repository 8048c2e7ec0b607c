mod parser;

use std::{fmt, str::FromStr};

use crate::digest::Digest;

/// Errors from [`Reference::try_from`].
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Missing registry.")]
    MissingRegistry,

    #[error("Missing repository.")]
    MissingRepository,

    #[error("Invalid repository name.")]
    InvalidRepository,

    #[error("{0}")]
    InvalidDigest(#[from] crate::digest::DigestError),
}

/// Reference to a repository in an OCI registry, and optionally to
/// a manifest in it.
///
/// The registry is always required: there is no default registry.
/// The first component is the registry if it contains a `.` or a `:`,
/// or if it is `localhost`.
///
/// # Examples
///
/// ```
/// # use oci_referrers::*;
/// const REFERENCE: &str = "registry.example.com:5000/foo/bar:v1@sha256:123456789012345678901234567890123456789012345678901234567890abcd";
///
/// let reference = Reference::try_from(REFERENCE).unwrap();
/// assert_eq!(reference.registry, "registry.example.com:5000");
/// assert_eq!(reference.repository, "foo/bar");
/// assert_eq!(reference.tag.as_deref(), Some("v1"));
///
/// let digest = reference.digest.as_ref().unwrap();
/// assert_eq!(digest.algorithm(), DigestAlgorithm::SHA256);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    /// Address of the registry server (`host[:port]`).
    pub registry: String,

    /// Repository name, like `library/debian`.
    pub repository: String,

    pub tag: Option<String>,

    pub digest: Option<Digest>,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;

        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }

        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }

        Ok(())
    }
}

impl TryFrom<&str> for Reference {
    type Error = ParseError;

    fn try_from(reference: &str) -> Result<Self, Self::Error> {
        parser::parse(reference)
    }
}

impl FromStr for Reference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parser::parse(s)
    }
}
