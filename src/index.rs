use std::collections::BTreeMap;

use crate::{Descriptor, MediaType};

/// OCI image index.
///
/// Refs:
///
/// * https://github.com/opencontainers/image-spec/blob/main/image-index.md
/// * https://github.com/opencontainers/distribution-spec/blob/main/spec.md#referrers-tag-schema
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    #[serde(default)]
    pub manifests: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    #[serde(default, skip_serializing_if = "crate::descriptor::is_unset")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Index {
    /// Build an index listing `manifests`, and return its descriptor
    /// and its JSON content.
    ///
    /// The output is deterministic: the same `manifests` always produce
    /// the same bytes, and thus the same digest.
    ///
    /// ```
    /// # use oci_referrers::*;
    /// let (descriptor, content) = Index::generate(Vec::new()).unwrap();
    ///
    /// assert_eq!(
    ///     content,
    ///     br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[]}"#
    /// );
    /// assert_eq!(descriptor.media_type, MediaType::OciImageIndex.as_str());
    /// assert_eq!(descriptor.size, content.len() as u64);
    /// ```
    pub fn generate(manifests: Vec<Descriptor>) -> Result<(Descriptor, Vec<u8>), serde_json::Error> {
        let index = Index {
            schema_version: 2,
            media_type: Some(MediaType::OciImageIndex.as_str().to_owned()),
            manifests,
            ..Default::default()
        };

        let content = serde_json::to_vec(&index)?;
        let descriptor = Descriptor::from_content(MediaType::OciImageIndex.as_str(), &content);

        Ok((descriptor, content))
    }
}

#[test]
fn generated_index_is_content_addressed() {
    use crate::Digest;

    let manifests = vec![
        Descriptor::from_content(MediaType::OciManifestV1.as_str(), b"a")
            .with_artifact_type("application/vnd.example.sbom")
            .with_annotation("org.opencontainers.image.created", "2024-01-01T00:00:00Z"),
        Descriptor::from_content(MediaType::OciManifestV1.as_str(), b"b"),
    ];

    let (descriptor, content) = Index::generate(manifests.clone()).unwrap();
    let (again, content_again) = Index::generate(manifests.clone()).unwrap();

    assert_eq!(content, content_again);
    assert_eq!(descriptor, again);
    assert_eq!(descriptor.digest, Digest::sha256(&content).source());
    assert_eq!(descriptor.size, content.len() as u64);

    let index: Index = serde_json::from_slice(&content).unwrap();
    assert_eq!(index.schema_version, 2);
    assert_eq!(index.media_type.as_deref(), Some(MediaType::OciImageIndex.as_str()));
    assert_eq!(index.manifests, manifests);
    assert!(index.subject.is_none());
}

#[test]
fn empty_annotations_are_omitted() {
    let mut referrer = Descriptor::from_content(MediaType::OciManifestV1.as_str(), b"a");
    referrer.annotations = Some(BTreeMap::new());

    let (descriptor, content) = Index::generate(vec![referrer.clone()]).unwrap();

    referrer.annotations = None;
    let (expected, _) = Index::generate(vec![referrer]).unwrap();

    let content = String::from_utf8(content).unwrap();
    assert!(!content.contains("annotations"), "{content}");
    assert_eq!(descriptor, expected);
}
