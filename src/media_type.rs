use std::{fmt, str::FromStr};

/// Generate the `MediaType` enum, its `FromStr` and `Display`
/// implementations, and the associated constant `ALL` with all
/// the manifest types.
macro_rules! media_types {
    ($($variant:ident = $mediatype:expr,)*) => {
        /// Known media types of manifests and indexes.
        #[non_exhaustive]
        #[derive(Copy, Clone, PartialEq, Eq, Debug)]
        pub enum MediaType {
            $(
                #[doc = concat!("Variant for `", $mediatype, "`.")]
                $variant,
            )*
        }

        impl MediaType {
            /// List with all known media types.
            pub const ALL: &[&str] = &[ $($mediatype),* ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(MediaType::$variant => $mediatype,)*
                }
            }
        }

        impl FromStr for MediaType {
            type Err = InvalidMediaType;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Ignore parameters, like `; charset=utf-8`.
                let essence = s.split(';').next().unwrap_or_default().trim();
                match essence {
                    $($mediatype => Ok(MediaType::$variant),)*
                    _ => Err(InvalidMediaType),
                }
            }
        }

        impl fmt::Display for MediaType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    }
}

media_types!(
    DockerManifestList = "application/vnd.docker.distribution.manifest.list.v2+json",
    DockerManifestV2 = "application/vnd.docker.distribution.manifest.v2+json",
    OciArtifactManifest = "application/vnd.oci.artifact.manifest.v1+json",
    OciImageIndex = "application/vnd.oci.image.index.v1+json",
    OciManifestV1 = "application/vnd.oci.image.manifest.v1+json",
);

/// Config media type of artifacts with no configuration.
pub const EMPTY_CONFIG: &str = "application/vnd.oci.empty.v1+json";

#[derive(Debug, PartialEq)]
pub struct InvalidMediaType;

#[test]
fn parse_content_type() {
    assert_eq!(
        MediaType::from_str("application/vnd.oci.image.index.v1+json"),
        Ok(MediaType::OciImageIndex)
    );

    assert_eq!(
        MediaType::from_str("application/vnd.oci.image.manifest.v1+json; charset=utf-8"),
        Ok(MediaType::OciManifestV1)
    );

    assert_eq!(MediaType::from_str("text/plain"), Err(InvalidMediaType));
}
