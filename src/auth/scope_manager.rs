use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use arc_swap::ArcSwap;

use super::{Action, Scope};

/// Actions for each resource of a host.
type HostScopes = BTreeMap<String, BTreeSet<Action>>;

type HostTable = HashMap<String, Arc<ArcSwap<HostScopes>>>;

/// Authorization scopes requested for each registry host.
///
/// Scopes only grow: once an action is recorded for a resource, it is
/// included in every token requested for that host. This allows a cached
/// token to be reused by every request that needed it in the past.
///
/// The manager can be shared between threads. Readers get snapshots, and
/// writers publish new versions of the scopes of a host with a
/// compare-and-swap loop, so no update is lost, and writers on different
/// hosts don't wait for each other.
///
/// # Examples
///
/// ```
/// # use oci_referrers::auth::*;
/// let scopes = ScopeManager::new();
///
/// scopes.set_scope_for_registry("example.com", Scope::repository("foo", [Action::Pull]));
/// scopes.set_scope_for_registry("example.com", Scope::repository("foo", [Action::Push]));
///
/// assert_eq!(
///     scopes.get_scope_strings_for_host("example.com"),
///     ["repository:foo:pull,push"]
/// );
/// ```
pub struct ScopeManager {
    hosts: ArcSwap<HostTable>,
}

impl ScopeManager {
    pub fn new() -> Self {
        ScopeManager {
            hosts: ArcSwap::from_pointee(HostTable::new()),
        }
    }

    /// Snapshot of the scopes for `host`.
    ///
    /// Changes made after this call are not visible in the returned set.
    pub fn get_scopes_for_host(&self, host: &str) -> BTreeSet<Scope> {
        let Some(entry) = self.hosts.load().get(host).cloned() else {
            return BTreeSet::new();
        };

        let scopes = entry.load();
        scopes
            .iter()
            .map(|(resource, actions)| Scope {
                resource: resource.clone(),
                actions: actions.clone(),
            })
            .collect()
    }

    /// Scopes for `host`, formatted as `resource:actions`, in the
    /// order of [`Scope`].
    pub fn get_scope_strings_for_host(&self, host: &str) -> Vec<String> {
        self.get_scopes_for_host(host)
            .iter()
            .map(Scope::to_string)
            .collect()
    }

    /// Add `scope` to the scopes of `host`.
    ///
    /// If there is a scope for the same resource, the actions are
    /// merged. [`Action::All`] replaces any other action.
    ///
    /// Scopes without actions are ignored.
    pub fn set_scope_for_registry(&self, host: &str, scope: Scope) {
        let Scope { resource, actions } = scope.normalized();

        if actions.is_empty() {
            tracing::trace!(host, resource = %resource, "Ignored scope without actions");
            return;
        }

        let entry = self.host_entry(host);

        // The closure may run several times if other threads update
        // the same host.
        entry.rcu(|current| {
            let mut scopes = HostScopes::clone(current);
            merge_actions(scopes.entry(resource.clone()).or_default(), &actions);
            scopes
        });

        tracing::trace!(host, resource = %resource, ?actions, "Registry scope added");
    }

    /// Remove all scopes of all hosts.
    ///
    /// Only intended for tests that share a manager. A write concurrent
    /// to `reset` may be lost.
    pub fn reset(&self) {
        self.hosts.store(Arc::new(HostTable::new()));
    }

    /// Return the scopes of `host`, creating an empty table if needed.
    fn host_entry(&self, host: &str) -> Arc<ArcSwap<HostScopes>> {
        loop {
            if let Some(entry) = self.hosts.load().get(host) {
                return Arc::clone(entry);
            }

            self.hosts.rcu(|hosts| {
                let mut hosts = HostTable::clone(hosts);
                hosts
                    .entry(host.to_owned())
                    .or_insert_with(|| Arc::new(ArcSwap::from_pointee(HostScopes::new())));
                hosts
            });
        }
    }
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_actions(current: &mut BTreeSet<Action>, new: &BTreeSet<Action>) {
    if current.contains(&Action::All) || new.contains(&Action::All) {
        *current = BTreeSet::from([Action::All]);
    } else {
        current.extend(new.iter().copied());
    }
}

#[test]
fn merge_actions_for_resource() {
    let scopes = ScopeManager::new();

    scopes.set_scope_for_registry("h", Scope::repository("r", [Action::Pull]));
    scopes.set_scope_for_registry("h", Scope::repository("r", [Action::Push]));

    assert_eq!(
        scopes.get_scopes_for_host("h"),
        BTreeSet::from([Scope::repository("r", [Action::Pull, Action::Push])])
    );
}

#[test]
fn all_absorbs_other_actions() {
    let scopes = ScopeManager::new();

    scopes.set_scope_for_registry("h", Scope::repository("r", [Action::All]));
    scopes.set_scope_for_registry("h", Scope::repository("r", [Action::Pull]));
    assert_eq!(scopes.get_scope_strings_for_host("h"), ["repository:r:*"]);

    scopes.set_scope_for_registry("h", Scope::repository("s", [Action::Pull, Action::Delete]));
    scopes.set_scope_for_registry("h", Scope::repository("s", [Action::All, Action::Push]));
    assert_eq!(
        scopes.get_scope_strings_for_host("h"),
        ["repository:r:*", "repository:s:*"]
    );
}

#[test]
fn hosts_are_isolated() {
    let scopes = ScopeManager::new();

    scopes.set_scope_for_registry("h1", Scope::repository("r", [Action::Pull]));

    assert!(scopes.get_scopes_for_host("h2").is_empty());
    assert!(scopes.get_scope_strings_for_host("h2").is_empty());
    assert_eq!(scopes.get_scope_strings_for_host("h1"), ["repository:r:pull"]);
}

#[test]
fn deterministic_order() {
    let scopes = ScopeManager::new();

    for name in ["b", "c", "a"] {
        scopes.set_scope_for_registry("h", Scope::repository(name, [Action::Delete, Action::Pull]));
    }

    scopes.set_scope_for_registry("h", Scope::new("registry:catalog", [Action::All]));

    assert_eq!(
        scopes.get_scope_strings_for_host("h"),
        [
            "registry:catalog:*",
            "repository:a:pull,delete",
            "repository:b:pull,delete",
            "repository:c:pull,delete",
        ]
    );
}

#[test]
fn snapshots_are_not_live() {
    let scopes = ScopeManager::new();

    scopes.set_scope_for_registry("h", Scope::repository("r", [Action::Pull]));
    let snapshot = scopes.get_scopes_for_host("h");
    scopes.set_scope_for_registry("h", Scope::repository("r", [Action::Push]));

    assert_eq!(
        snapshot,
        BTreeSet::from([Scope::repository("r", [Action::Pull])])
    );
}

#[test]
fn reset_scopes() {
    let scopes = ScopeManager::new();

    scopes.set_scope_for_registry("h", Scope::repository("r", [Action::All]));
    scopes.reset();
    assert!(scopes.get_scopes_for_host("h").is_empty());

    // After a reset, `All` no longer absorbs new actions.
    scopes.set_scope_for_registry("h", Scope::repository("r", [Action::Pull]));
    assert_eq!(scopes.get_scope_strings_for_host("h"), ["repository:r:pull"]);
}

#[test]
fn ignore_scopes_without_actions() {
    let scopes = ScopeManager::new();

    scopes.set_scope_for_registry("h", Scope::repository("empty", []));
    assert!(scopes.get_scopes_for_host("h").is_empty());

    scopes.set_scope_for_registry("h", Scope::repository("r", [Action::Delete]));
    scopes.set_scope_for_registry("h", Scope::repository("r", []));

    let strings = scopes.get_scope_strings_for_host("h");
    assert_eq!(strings, ["repository:r:delete"]);

    // Every string can be parsed back.
    for scope in &strings {
        assert!(scope.parse::<Scope>().is_ok());
    }
}
