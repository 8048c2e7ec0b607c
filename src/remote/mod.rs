//! Client for the referrers of manifests in a remote repository.
//!
//! If the registry implements the [referrers API][api], pushing a
//! manifest with a `subject` is enough. Otherwise, the client keeps the
//! referrers index of the subject (see [`crate::build_referrers_tag`]).
//!
//! [api]: https://github.com/opencontainers/distribution-spec/blob/main/spec.md#listing-referrers

mod event_handler;
mod http;
#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    io::{self, Read},
    str::FromStr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, RwLock,
    },
};

use crate::{
    apply_referrer_changes,
    auth::{Action, ScopeManager},
    build_referrers_tag,
    digest::DigestError,
    Descriptor, Digest, Index, MediaType, Reference, ReferrerChange, ReferrersError,
    ReferrersState,
};

pub use event_handler::{EventHandler, NoEventHandler};

/// Limit for manifests and indexes read from the registry.
const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

/// Digest of empty content. Used to check if the referrers API
/// is available.
const EMPTY_SHA256: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] Box<ureq::Error>),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid digest: {0}")]
    InvalidDigest(#[from] DigestError),

    #[error("{0}")]
    Referrers(#[from] ReferrersError),

    #[error("Missing authentication tokens.")]
    MissingTokens,

    #[error("Invalid Content-Type: {0:?}")]
    InvalidContentType(String),

    #[error("Manifest is larger than {MAX_MANIFEST_SIZE} bytes.")]
    ManifestTooLarge,

    #[error("Referrers state is already set to a different value.")]
    ReferrersStateConflict,
}

impl From<ureq::Error> for RemoteError {
    fn from(value: ureq::Error) -> Self {
        RemoteError::Http(Box::new(value))
    }
}

impl RemoteError {
    /// `true` if the registry responded with `404 Not Found`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Http(e) if matches!(**e, ureq::Error::Status(404, _)))
    }
}

/// Repository in a remote registry.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use oci_referrers::{auth::ScopeManager, remote::Repository, *};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let scopes = Arc::new(ScopeManager::new());
/// let reference = Reference::try_from("registry.example.com/foo/bar")?;
///
/// let repository = Repository::new(reference)
///     .scope_manager(Arc::clone(&scopes))
///     .skip_referrers_gc(true);
///
/// let subject = Descriptor::from_content(MediaType::OciManifestV1.as_str(), b"...");
/// let signature = br#"{"schemaVersion":2,"artifactType":"application/vnd.example.sig"}"#;
///
/// repository.push_referrer(MediaType::OciManifestV1.as_str(), signature, &subject)?;
/// # Ok(())
/// # }
/// ```
pub struct Repository<E = NoEventHandler> {
    reference: Reference,
    plain_http: Option<bool>,
    skip_referrers_gc: bool,
    manifest_media_types: Option<Vec<String>>,
    scopes: Arc<ScopeManager>,
    event_handler: E,
    token: RwLock<Option<http::BearerToken>>,
    referrers_state: AtomicU8,
}

impl Repository<NoEventHandler> {
    pub fn new(reference: Reference) -> Self {
        Repository {
            reference,
            plain_http: None,
            skip_referrers_gc: false,
            manifest_media_types: None,
            scopes: Arc::new(ScopeManager::new()),
            event_handler: NoEventHandler,
            token: RwLock::new(None),
            referrers_state: AtomicU8::new(ReferrersState::Unknown as u8),
        }
    }
}

impl<E: EventHandler> Repository<E> {
    /// Use `http://` (if `true`) or `https://` to access the registry.
    ///
    /// If it is not set, it uses `http://` when the registry is a
    /// loopback address, or the port is `:80`.
    pub fn plain_http(mut self, plain_http: bool) -> Self {
        self.plain_http = Some(plain_http);
        self
    }

    /// Keep the previous referrers index after pushing a new one.
    pub fn skip_referrers_gc(mut self, skip: bool) -> Self {
        self.skip_referrers_gc = skip;
        self
    }

    /// Media types for the `Accept` header when fetching manifests.
    ///
    /// By default, all types in [`MediaType::ALL`].
    pub fn manifest_media_types<I, S>(mut self, media_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest_media_types = Some(media_types.into_iter().map(Into::into).collect());
        self
    }

    /// Record the authorization scopes in `scopes`.
    ///
    /// Repositories on the same registry should share a scope manager,
    /// so their tokens include every scope requested before.
    pub fn scope_manager(mut self, scopes: Arc<ScopeManager>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn event_handler<H: EventHandler>(self, event_handler: H) -> Repository<H> {
        Repository {
            reference: self.reference,
            plain_http: self.plain_http,
            skip_referrers_gc: self.skip_referrers_gc,
            manifest_media_types: self.manifest_media_types,
            scopes: self.scopes,
            event_handler,
            token: self.token,
            referrers_state: self.referrers_state,
        }
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn scopes(&self) -> &ScopeManager {
        &self.scopes
    }

    pub fn referrers_state(&self) -> ReferrersState {
        ReferrersState::from_u8(self.referrers_state.load(Ordering::Acquire))
    }

    /// Record whether the repository implements the referrers API.
    ///
    /// The state can be set only once. Setting it again to the same
    /// value is allowed.
    pub fn set_referrers_state(&self, supported: bool) -> Result<(), RemoteError> {
        let state = ReferrersState::from(supported) as u8;

        match self.referrers_state.compare_exchange(
            ReferrersState::Unknown as u8,
            state,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.event_handler.referrers_state(supported);
                Ok(())
            }

            Err(current) if current == state => Ok(()),

            Err(_) => Err(RemoteError::ReferrersStateConflict),
        }
    }

    /// Check if the repository implements the referrers API.
    ///
    /// The registry is queried only if the state is unknown.
    pub fn ping_referrers(&self) -> Result<bool, RemoteError> {
        match self.referrers_state() {
            ReferrersState::Supported => return Ok(true),
            ReferrersState::NotSupported => return Ok(false),
            ReferrersState::Unknown => (),
        }

        let request = ureq::get(&self.url(&format!("referrers/{EMPTY_SHA256}")))
            .set("Accept", MediaType::OciImageIndex.as_str());

        let supported = match self.send(request, None, &[Action::Pull]) {
            Ok(response) => is_index(&response),
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        self.set_referrers_state(supported)?;
        Ok(supported)
    }

    /// Push a manifest, and return its descriptor.
    ///
    /// `reference` is either a tag or the digest of `content`.
    pub fn push_manifest(
        &self,
        reference: &str,
        media_type: &str,
        content: &[u8],
    ) -> Result<Descriptor, RemoteError> {
        self.put_manifest(reference, media_type, content)?;
        Ok(Descriptor::from_content(media_type, content))
    }

    /// Delete the manifest with the given digest.
    pub fn delete_manifest(&self, digest: &str) -> Result<(), RemoteError> {
        let request = ureq::delete(&self.url(&format!("manifests/{digest}")));
        self.send(request, None, &[Action::Delete])?;
        Ok(())
    }

    /// Get the referrers index for `subject`.
    ///
    /// Returns `None` if there is no index.
    pub fn fetch_referrers_index(
        &self,
        subject: &Descriptor,
    ) -> Result<Option<(Descriptor, Index)>, RemoteError> {
        let tag = build_referrers_tag(subject)?;

        let accept = match &self.manifest_media_types {
            Some(media_types) => media_types.join(", "),
            None => MediaType::ALL.join(", "),
        };

        let request = ureq::get(&self.url(&format!("manifests/{tag}"))).set("Accept", &accept);

        let response = match self.send(request, None, &[Action::Pull]) {
            Ok(r) => r,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if !is_index(&response) {
            let content_type = response.header("Content-Type").unwrap_or_default();
            return Err(RemoteError::InvalidContentType(content_type.to_owned()));
        }

        let expected = response
            .header("Docker-Content-Digest")
            .map(|d| Digest::try_from(d))
            .transpose()?;

        let content = read_manifest(response, expected.as_ref())?;
        let index = serde_json::from_slice(&content)?;
        let descriptor = Descriptor::from_content(MediaType::OciImageIndex.as_str(), &content);

        Ok(Some((descriptor, index)))
    }

    /// Apply `changes` to the referrers index of `subject`.
    ///
    /// If the changes have no effect, nothing is pushed. If the updated
    /// index is empty, it is not pushed, and the previous one is deleted.
    ///
    /// This is a read-modify-write cycle. Concurrent updates for the
    /// same subject must be serialized by the caller.
    pub fn update_referrers_index(
        &self,
        subject: &Descriptor,
        changes: &[ReferrerChange],
    ) -> Result<(), RemoteError> {
        let tag = build_referrers_tag(subject)?;

        let (old_index, old_referrers) = match self.fetch_referrers_index(subject)? {
            Some((descriptor, index)) => (Some(descriptor), index.manifests),
            None => (None, Vec::new()),
        };

        let referrers = match apply_referrer_changes(Some(old_referrers.as_slice()), Some(changes)) {
            Ok(r) => r,
            Err(ReferrersError::NoUpdateNeeded) => {
                tracing::debug!(%tag, "Referrers index is up to date");
                self.event_handler.referrers_index_unchanged(&tag);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !referrers.is_empty() {
            let count = referrers.len();
            let (descriptor, content) = Index::generate(referrers)?;
            self.put_manifest(&tag, &descriptor.media_type, &content)?;

            tracing::debug!(%tag, digest = %descriptor.digest, count, "Referrers index pushed");
            self.event_handler.referrers_index_updated(&tag, count);
        }

        if self.skip_referrers_gc {
            return Ok(());
        }

        if let Some(old_index) = old_index {
            self.delete_manifest(&old_index.digest)?;
            self.event_handler.referrers_index_deleted(&old_index.digest);
        }

        Ok(())
    }

    /// Push a manifest that refers to `subject`.
    ///
    /// If the registry does not implement the referrers API, the
    /// manifest is added to the referrers index of `subject`. Once the
    /// repository is known to lack the API, the `OCI-Subject` header
    /// of later responses is ignored.
    ///
    /// The returned descriptor includes the artifact type and the
    /// annotations of the manifest.
    pub fn push_referrer(
        &self,
        media_type: &str,
        content: &[u8],
        subject: &Descriptor,
    ) -> Result<Descriptor, RemoteError> {
        let referrer = referrer_descriptor(media_type, content)?;
        let response = self.put_manifest(&referrer.digest, media_type, content)?;

        if self.referrers_state() == ReferrersState::Unknown {
            // Registries with the referrers API confirm the subject in
            // the response. The first recorded state is kept.
            let supported = response.header("OCI-Subject").is_some();
            if let Err(RemoteError::ReferrersStateConflict) = self.set_referrers_state(supported) {
                tracing::debug!(supported, "Referrers state already recorded");
            }
        }

        if self.referrers_state() == ReferrersState::Supported {
            return Ok(referrer);
        }

        self.update_referrers_index(subject, &[ReferrerChange::add(referrer.clone())])?;

        Ok(referrer)
    }

    /// Delete a manifest that refers to `subject`.
    ///
    /// If the registry does not implement the referrers API, the
    /// manifest is removed from the referrers index of `subject`.
    pub fn delete_referrer(
        &self,
        referrer: &Descriptor,
        subject: &Descriptor,
    ) -> Result<(), RemoteError> {
        self.delete_manifest(&referrer.digest)?;

        if self.ping_referrers()? {
            return Ok(());
        }

        self.update_referrers_index(subject, &[ReferrerChange::delete(referrer.clone())])
    }

    fn put_manifest(
        &self,
        reference: &str,
        media_type: &str,
        content: &[u8],
    ) -> Result<ureq::Response, RemoteError> {
        let request = ureq::put(&self.url(&format!("manifests/{reference}")))
            .set("Content-Type", media_type);

        self.send(request, Some(content), &[Action::Pull, Action::Push])
    }
}

fn is_index(response: &ureq::Response) -> bool {
    matches!(
        response.header("Content-Type").map(MediaType::from_str),
        Some(Ok(MediaType::OciImageIndex))
    )
}

/// Read a manifest from `response`, up to `MAX_MANIFEST_SIZE` bytes.
///
/// If `expected` is present, the content must match it.
fn read_manifest(response: ureq::Response, expected: Option<&Digest>) -> Result<Vec<u8>, RemoteError> {
    let body = response.into_reader();
    let reader: Box<dyn Read> = match expected {
        Some(digest) => Box::new(digest.wrap_reader(body)),
        None => Box::new(body),
    };

    // `take` wraps the digest reader, so an oversized body stops before
    // EOF and is reported as too large, not as a digest mismatch.
    let mut content = Vec::new();
    reader
        .take(MAX_MANIFEST_SIZE + 1)
        .read_to_end(&mut content)?;

    if content.len() as u64 > MAX_MANIFEST_SIZE {
        return Err(RemoteError::ManifestTooLarge);
    }

    Ok(content)
}

/// Descriptor for a referrer manifest, to be added in a referrers index.
///
/// The artifact type is taken from `artifactType` or, if missing, from
/// the media type of the config.
fn referrer_descriptor(media_type: &str, content: &[u8]) -> Result<Descriptor, RemoteError> {
    #[derive(serde::Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    struct Manifest {
        artifact_type: Option<String>,
        config: Option<Config>,
        annotations: Option<BTreeMap<String, String>>,
    }

    #[derive(serde::Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    struct Config {
        media_type: String,
    }

    let manifest: Manifest = serde_json::from_slice(content)?;

    let mut descriptor = Descriptor::from_content(media_type, content);
    descriptor.artifact_type = manifest
        .artifact_type
        .or_else(|| manifest.config.map(|c| c.media_type));
    descriptor.annotations = manifest.annotations.filter(|a| !a.is_empty());

    Ok(descriptor)
}

#[test]
fn referrer_artifact_type() {
    use crate::media_type::EMPTY_CONFIG;

    let media_type = MediaType::OciManifestV1.as_str();

    let manifest = format!(
        r#"{{"schemaVersion":2,"config":{{"mediaType":"{EMPTY_CONFIG}"}},"annotations":{{"a":"1"}}}}"#
    );
    let descriptor = referrer_descriptor(media_type, manifest.as_bytes()).unwrap();
    assert_eq!(descriptor.artifact_type.as_deref(), Some(EMPTY_CONFIG));
    assert_eq!(descriptor.annotations.unwrap()["a"], "1");
    assert_eq!(descriptor.size, manifest.len() as u64);

    let manifest = br#"{"artifactType":"application/vnd.example.sig","config":{"mediaType":"x"}}"#;
    let descriptor = referrer_descriptor(media_type, manifest).unwrap();
    assert_eq!(
        descriptor.artifact_type.as_deref(),
        Some("application/vnd.example.sig")
    );
    assert!(descriptor.annotations.is_none());

    let manifest = br#"{"schemaVersion":2,"artifactType":"a/b","annotations":{}}"#;
    let descriptor = referrer_descriptor(media_type, manifest).unwrap();
    assert!(descriptor.annotations.is_none());

    let (_, index) = Index::generate(vec![descriptor]).unwrap();
    assert!(!String::from_utf8(index).unwrap().contains("annotations"));

    assert!(matches!(
        referrer_descriptor(media_type, b"not json"),
        Err(RemoteError::Json(_))
    ));
}
