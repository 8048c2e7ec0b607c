//! Parse a reference like `registry.example.com/foo/bar:tag@sha256:...`.

use super::*;

type Result<T> = std::result::Result<T, ParseError>;

pub(super) fn parse(reference: &str) -> Result<Reference> {
    // Extract the digest after the last `@`.
    let (base, digest) = match reference.rsplit_once('@') {
        None => (reference, None),
        Some((base, d)) => (base, Some(Digest::try_from(d)?)),
    };

    // Registry is everything before the first `/`.
    let (registry, path) = base.split_once('/').ok_or(ParseError::MissingRepository)?;

    if !is_registry(registry) {
        return Err(ParseError::MissingRegistry);
    }

    // Extract the tag after the last `:`. The registry is already
    // removed, so a `:` can't be a port number.
    let (repository, tag) = match path.rsplit_once(':') {
        Some((repository, tag)) => (repository, Some(tag.to_owned())),
        None => (path, None),
    };

    if repository.is_empty() {
        return Err(ParseError::MissingRepository);
    }

    if !is_repository(repository) {
        return Err(ParseError::InvalidRepository);
    }

    Ok(Reference {
        registry: registry.to_owned(),
        repository: repository.to_owned(),
        tag,
        digest,
    })
}

fn is_registry(registry: &str) -> bool {
    registry == "localhost" || registry.contains(['.', ':'])
}

/// Repository components are lowercase alphanumeric strings, joined
/// by `/`, with separators (`.`, `_`, `-`) between alphanumerics.
fn is_repository(repository: &str) -> bool {
    repository.split('/').all(|component| {
        let bytes = component.as_bytes();
        let alnum = |c: &u8| c.is_ascii_lowercase() || c.is_ascii_digit();

        matches!((bytes.first(), bytes.last()), (Some(a), Some(z)) if alnum(a) && alnum(z))
            && bytes.iter().all(|c| alnum(c) || matches!(c, b'.' | b'_' | b'-'))
    })
}

#[test]
fn parse_valid_references() {
    macro_rules! check {
        ($reference:expr, [ $registry:expr, $repository:expr, $tag:expr, $digest:expr ]) => {
            assert_eq!(
                Reference::try_from($reference).unwrap(),
                Reference {
                    registry: $registry.into(),
                    repository: $repository.into(),
                    tag: $tag.map(String::from),
                    digest: $digest,
                }
            )
        };
    }

    let sha256 = Digest::sha256(b"\x00\x01");

    check!("localhost/foo", ["localhost", "foo", None::<&str>, None]);

    check!(
        "example.com:5678/foo/bar:1.2.3",
        ["example.com:5678", "foo/bar", Some("1.2.3"), None]
    );

    check!(
        format!("127.0.0.1:5000/a/b-c/d_e@{sha256}").as_str(),
        ["127.0.0.1:5000", "a/b-c/d_e", None::<&str>, Some(sha256.clone())]
    );

    check!(
        format!("example.com/foo:latest@{sha256}").as_str(),
        ["example.com", "foo", Some("latest"), Some(sha256.clone())]
    );

    let reference = Reference::try_from(format!("example.com/foo:v1@{sha256}").as_str());
    assert_eq!(
        reference.unwrap().to_string(),
        format!("example.com/foo:v1@{sha256}")
    );
}

#[test]
fn reject_invalid_references() {
    use crate::digest::DigestError;

    for (reference, error) in [
        ("debian", ParseError::MissingRepository),
        ("library/debian", ParseError::MissingRegistry),
        ("example.com/", ParseError::MissingRepository),
        ("example.com/Foo", ParseError::InvalidRepository),
        ("example.com/foo//bar", ParseError::InvalidRepository),
        ("example.com/-foo", ParseError::InvalidRepository),
        (
            "example.com/foo@md5:0000",
            ParseError::InvalidDigest(DigestError::InvalidAlgorithm),
        ),
        (
            "example.com/foo@sha256:0000",
            ParseError::InvalidDigest(DigestError::InvalidValue),
        ),
    ] {
        assert_eq!(Reference::try_from(reference), Err(error), "{reference}");
    }
}
