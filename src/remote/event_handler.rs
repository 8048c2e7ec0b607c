/// Handler to receive notifications for events in a [`Repository`].
///
/// All methods are optional.
///
/// [`Repository`]: super::Repository
#[expect(unused_variables)]
pub trait EventHandler: Send + Sync + 'static {
    /// HTTP request to the registry.
    fn registry_request(&self, method: &str, url: &str) {}

    /// Registry requires an [authentication token][token].
    ///
    /// [token]: https://distribution.github.io/distribution/spec/auth/token/
    fn registry_auth(&self, url: &str) {}

    /// Detected whether the repository implements the referrers API.
    fn referrers_state(&self, supported: bool) {}

    /// A new referrers index was pushed for `tag`.
    ///
    /// `referrers` is the number of manifests in the index.
    fn referrers_index_updated(&self, tag: &str, referrers: usize) {}

    /// The changes to the referrers index for `tag` had no effect,
    /// so nothing was pushed.
    fn referrers_index_unchanged(&self, tag: &str) {}

    /// The previous referrers index was deleted.
    fn referrers_index_deleted(&self, digest: &str) {}
}

/// [`EventHandler`] instance to ignore all events.
pub struct NoEventHandler;

impl EventHandler for NoEventHandler {}
