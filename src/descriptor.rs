use std::collections::BTreeMap;

use crate::Digest;

/// Reference to a blob or manifest, as used in indexes and manifests.
///
/// See <https://github.com/opencontainers/image-spec/blob/main/descriptor.md>.
///
/// The [default](Default) value is the *empty descriptor*: no media type,
/// no digest and size `0`. It may appear in referrers indexes written
/// by interrupted updates, and it is never a valid referrer.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,

    #[serde(default)]
    pub digest: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "is_unset")]
    pub annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

/// Platform of an image, in entries of an image index.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Platform {
    pub architecture: String,

    pub os: String,

    #[serde(
        rename = "os.version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub os_version: Option<String>,

    #[serde(
        rename = "os.features",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub os_features: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// `true` if there are no annotations. Empty maps are not serialized.
pub(crate) fn is_unset(annotations: &Option<BTreeMap<String, String>>) -> bool {
    annotations.as_ref().map_or(true, BTreeMap::is_empty)
}

/// Identity of a descriptor: media type, digest and size.
///
/// Two descriptors with the same `BasicDescriptor` refer to the same
/// content, even if their annotations or artifact types differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BasicDescriptor<'a> {
    pub media_type: &'a str,
    pub digest: &'a str,
    pub size: u64,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Descriptor {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            ..Default::default()
        }
    }

    /// Build the descriptor of `content`, using a SHA-256 digest.
    pub fn from_content(media_type: impl Into<String>, content: &[u8]) -> Self {
        Descriptor::new(
            media_type,
            Digest::sha256(content).source(),
            content.len() as u64,
        )
    }

    /// Return a copy with the annotation `key` set to `value`.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
        self
    }

    /// Return a copy with the given artifact type.
    pub fn with_artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    /// `true` if this is the empty descriptor.
    pub fn is_empty(&self) -> bool {
        self.size == 0 && self.media_type.is_empty() && self.digest.is_empty()
    }

    pub fn basic(&self) -> BasicDescriptor<'_> {
        BasicDescriptor {
            media_type: &self.media_type,
            digest: &self.digest,
            size: self.size,
        }
    }
}

#[test]
fn empty_descriptor() {
    assert!(Descriptor::default().is_empty());
    assert!(!Descriptor::from_content("text/plain", b"").is_empty());

    // Missing fields in JSON are read as the empty descriptor.
    let placeholder: Descriptor = serde_json::from_str("{}").unwrap();
    assert!(placeholder.is_empty());
}

#[test]
fn basic_descriptor_ignores_metadata() {
    let a = Descriptor::from_content("application/vnd.test+json", b"{}");
    let b = a
        .clone()
        .with_annotation("org.example.key", "1")
        .with_artifact_type("application/vnd.test.sig");

    assert_ne!(a, b);
    assert_eq!(a.basic(), b.basic());

    let c = Descriptor::from_content("application/vnd.other+json", b"{}");
    assert_ne!(a.basic(), c.basic());
}

#[test]
fn omit_unset_fields() {
    let descriptor = Descriptor::new("text/plain", "sha256:00", 2);
    assert_eq!(
        serde_json::to_string(&descriptor).unwrap(),
        r#"{"mediaType":"text/plain","digest":"sha256:00","size":2}"#
    );

    let descriptor = descriptor.with_annotation("b", "2").with_annotation("a", "1");
    assert_eq!(
        serde_json::to_string(&descriptor).unwrap(),
        r#"{"mediaType":"text/plain","digest":"sha256:00","size":2,"annotations":{"a":"1","b":"2"}}"#
    );
}

#[test]
fn omit_empty_annotations() {
    let mut descriptor = Descriptor::new("text/plain", "sha256:00", 2);
    descriptor.annotations = Some(BTreeMap::new());

    assert_eq!(
        serde_json::to_string(&descriptor).unwrap(),
        r#"{"mediaType":"text/plain","digest":"sha256:00","size":2}"#
    );
}
