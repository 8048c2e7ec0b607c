use oci_referrers::{
    build_referrers_tag, remote::Repository, Descriptor, Index, MediaType, ReferrerChange,
    ReferrersState, EMPTY_CONFIG,
};

mod common;

use common::registry::Registry;

const SIGNATURE: &str = "application/vnd.example.signature";
const SBOM: &str = "application/vnd.example.sbom";

/// Manifest of an artifact attached to `subject`.
fn artifact(subject: &Descriptor, artifact_type: &str) -> Vec<u8> {
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MediaType::OciManifestV1.as_str(),
        "artifactType": artifact_type,
        "config": {
            "mediaType": EMPTY_CONFIG,
            "digest": "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
            "size": 2,
        },
        "layers": [],
        "subject": {
            "mediaType": subject.media_type,
            "digest": subject.digest,
            "size": subject.size,
        },
    });

    serde_json::to_vec(&manifest).unwrap()
}

fn push_subject(repository: &Repository) -> Descriptor {
    let content = br#"{"schemaVersion":2,"layers":[]}"#;
    repository
        .push_manifest("v1", MediaType::OciManifestV1.as_str(), content)
        .unwrap()
}

#[test]
fn fallback_index_lifecycle() {
    let registry = Registry::start("foo/bar", false);
    let repository = Repository::new(registry.reference());
    let media_type = MediaType::OciManifestV1.as_str();

    let subject = push_subject(&repository);
    let tag = build_referrers_tag(&subject).unwrap();

    // First referrer. The registry does not send `OCI-Subject`, so
    // the index is created.
    let signature = repository
        .push_referrer(media_type, &artifact(&subject, SIGNATURE), &subject)
        .unwrap();

    assert_eq!(signature.artifact_type.as_deref(), Some(SIGNATURE));
    assert_eq!(repository.referrers_state(), ReferrersState::NotSupported);

    let first_index = Index::generate(vec![signature.clone()]).unwrap().0;
    assert_eq!(registry.tag(&tag), Some(first_index.digest.clone()));

    // Second referrer. The previous index is deleted.
    let sbom = repository
        .push_referrer(media_type, &artifact(&subject, SBOM), &subject)
        .unwrap();

    assert!(!registry.contains(&first_index.digest));

    let (descriptor, index) = repository.fetch_referrers_index(&subject).unwrap().unwrap();
    assert_eq!(index.manifests, [signature.clone(), sbom.clone()]);
    assert_eq!(registry.tag(&tag), Some(descriptor.digest));
    assert_eq!(registry.puts(&tag), 2);

    // Pushing the same referrer again does not modify the index.
    repository
        .push_referrer(media_type, &artifact(&subject, SIGNATURE), &subject)
        .unwrap();

    assert_eq!(registry.puts(&tag), 2);

    // Delete referrers.
    repository.delete_referrer(&signature, &subject).unwrap();
    assert!(!registry.contains(&signature.digest));

    let (_, index) = repository.fetch_referrers_index(&subject).unwrap().unwrap();
    assert_eq!(index.manifests, [sbom.clone()]);

    // Without referrers, the index is removed.
    repository.delete_referrer(&sbom, &subject).unwrap();

    assert!(repository.fetch_referrers_index(&subject).unwrap().is_none());
    assert_eq!(registry.tag(&tag), None);
    assert_eq!(registry.puts(&tag), 3);
}

#[test]
fn clean_up_broken_index() {
    let registry = Registry::start("foo/bar", false);
    let repository = Repository::new(registry.reference());

    let subject = push_subject(&repository);
    let tag = build_referrers_tag(&subject).unwrap();

    let referrer = Descriptor::from_content(MediaType::OciManifestV1.as_str(), b"referrer")
        .with_artifact_type(SIGNATURE);

    // Index with an empty descriptor, and the same referrer twice.
    let broken = Index {
        schema_version: 2,
        media_type: Some(MediaType::OciImageIndex.as_str().to_owned()),
        manifests: vec![
            Descriptor::default(),
            referrer.clone(),
            referrer.clone().with_annotation("key", "value"),
        ],
        ..Default::default()
    };

    let broken = repository
        .push_manifest(
            &tag,
            MediaType::OciImageIndex.as_str(),
            &serde_json::to_vec(&broken).unwrap(),
        )
        .unwrap();

    repository.update_referrers_index(&subject, &[]).unwrap();

    let (descriptor, index) = repository.fetch_referrers_index(&subject).unwrap().unwrap();
    assert_eq!(index.manifests, [referrer.clone()]);
    assert_ne!(descriptor.digest, broken.digest);
    assert!(!registry.contains(&broken.digest));

    // The index is clean now, so nothing else is pushed.
    repository.update_referrers_index(&subject, &[]).unwrap();
    repository
        .update_referrers_index(&subject, &[ReferrerChange::add(referrer)])
        .unwrap();

    assert_eq!(registry.puts(&tag), 2);
}

#[test]
fn keep_old_index_when_gc_is_disabled() {
    let registry = Registry::start("foo/bar", false);
    let repository = Repository::new(registry.reference()).skip_referrers_gc(true);
    let media_type = MediaType::OciManifestV1.as_str();

    let subject = push_subject(&repository);

    let signature = repository
        .push_referrer(media_type, &artifact(&subject, SIGNATURE), &subject)
        .unwrap();

    repository
        .push_referrer(media_type, &artifact(&subject, SBOM), &subject)
        .unwrap();

    let first_index = Index::generate(vec![signature]).unwrap().0;
    assert!(registry.contains(&first_index.digest));

    let (_, index) = repository.fetch_referrers_index(&subject).unwrap().unwrap();
    assert_eq!(index.manifests.len(), 2);
}

#[test]
fn registry_with_referrers_api() {
    let registry = Registry::start("foo/bar", true);
    let repository = Repository::new(registry.reference());
    let media_type = MediaType::OciManifestV1.as_str();

    let subject = push_subject(&repository);
    let tag = build_referrers_tag(&subject).unwrap();

    let signature = repository
        .push_referrer(media_type, &artifact(&subject, SIGNATURE), &subject)
        .unwrap();

    assert_eq!(repository.referrers_state(), ReferrersState::Supported);
    assert!(registry.contains(&signature.digest));
    assert_eq!(registry.tag(&tag), None);

    repository.delete_referrer(&signature, &subject).unwrap();
    assert!(!registry.contains(&signature.digest));
    assert_eq!(registry.puts(&tag), 0);

    // A new client detects the API with a request to the registry.
    let other = Repository::new(registry.reference());
    assert!(other.ping_referrers().unwrap());
}

#[test]
fn keep_fallback_index_after_detection() {
    // The registry sends `OCI-Subject`, but the repository was already
    // detected without the referrers API.
    let registry = Registry::start("foo/bar", true);
    let repository = Repository::new(registry.reference());
    repository.set_referrers_state(false).unwrap();

    let subject = push_subject(&repository);
    let tag = build_referrers_tag(&subject).unwrap();

    let signature = repository
        .push_referrer(
            MediaType::OciManifestV1.as_str(),
            &artifact(&subject, SIGNATURE),
            &subject,
        )
        .unwrap();

    assert_eq!(repository.referrers_state(), ReferrersState::NotSupported);
    assert!(registry.contains(&signature.digest));

    let (_, index) = repository.fetch_referrers_index(&subject).unwrap().unwrap();
    assert_eq!(index.manifests, [signature]);
    assert_eq!(registry.puts(&tag), 1);
}
