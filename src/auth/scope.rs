use std::{collections::BTreeSet, fmt, str::FromStr};

/// Operation allowed by a [`Scope`].
///
/// The order of the variants is the order of the actions in
/// serialized scopes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Pull,
    Push,
    Delete,

    /// Any operation (`*`). It absorbs every other action.
    All,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pull => "pull",
            Action::Push => "push",
            Action::Delete => "delete",
            Action::All => "*",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from [`Scope::from_str`].
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ScopeParseError {
    #[error("Missing actions in scope.")]
    MissingActions,

    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

impl FromStr for Action {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pull" => Ok(Action::Pull),
            "push" => Ok(Action::Push),
            "delete" => Ok(Action::Delete),
            "*" => Ok(Action::All),
            _ => Err(ScopeParseError::UnknownAction(s.to_owned())),
        }
    }
}

/// Access requested to the authorization service of a registry.
///
/// Its string form is `<resource>:<action>,<action>...`, like
/// `repository:library/debian:pull,push`.
///
/// Scopes are sorted by resource, then by their actions.
///
/// See <https://distribution.github.io/distribution/spec/auth/scope/>.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope {
    pub resource: String,
    pub actions: BTreeSet<Action>,
}

impl Scope {
    pub fn new(resource: impl Into<String>, actions: impl IntoIterator<Item = Action>) -> Self {
        Scope {
            resource: resource.into(),
            actions: actions.into_iter().collect(),
        }
    }

    /// Scope for a repository, like `repository:foo/bar:pull`.
    pub fn repository(name: &str, actions: impl IntoIterator<Item = Action>) -> Self {
        Scope::new(format!("repository:{name}"), actions)
    }

    /// Replace the actions with [`Action::All`] if it is present.
    pub fn normalized(mut self) -> Self {
        if self.actions.contains(&Action::All) {
            self.actions = BTreeSet::from([Action::All]);
        }

        self
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.resource)?;

        for (n, action) in self.actions.iter().enumerate() {
            if n > 0 {
                f.write_str(",")?;
            }

            f.write_str(action.as_str())?;
        }

        Ok(())
    }
}

impl FromStr for Scope {
    type Err = ScopeParseError;

    /// Parse a scope. The actions are after the last `:`, so the
    /// resource can contain `:` characters (like a registry port).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, actions) = s.rsplit_once(':').ok_or(ScopeParseError::MissingActions)?;

        let actions = actions
            .split(',')
            .filter(|a| !a.is_empty())
            .map(Action::from_str)
            .collect::<Result<BTreeSet<_>, _>>()?;

        if resource.is_empty() || actions.is_empty() {
            return Err(ScopeParseError::MissingActions);
        }

        Ok(Scope {
            resource: resource.to_owned(),
            actions,
        })
    }
}

#[test]
fn scope_strings() {
    let scope = Scope::repository("foo/bar", [Action::Push, Action::Pull]);
    assert_eq!(scope.to_string(), "repository:foo/bar:pull,push");
    assert_eq!("repository:foo/bar:push,pull".parse::<Scope>(), Ok(scope));

    let scope: Scope = "repository:example.com:5000/foo:*".parse().unwrap();
    assert_eq!(scope.resource, "repository:example.com:5000/foo");
    assert_eq!(scope.actions, BTreeSet::from([Action::All]));

    assert_eq!(
        "repository:foo:pull,fly".parse::<Scope>(),
        Err(ScopeParseError::UnknownAction("fly".into()))
    );

    assert_eq!(
        "repository".parse::<Scope>(),
        Err(ScopeParseError::MissingActions)
    );
}

#[test]
fn normalize_all() {
    let scope = Scope::repository("foo", [Action::Pull, Action::All, Action::Delete]);
    assert_eq!(scope.normalized().to_string(), "repository:foo:*");

    let scope = Scope::repository("foo", [Action::Delete, Action::Pull]);
    assert_eq!(scope.normalized().to_string(), "repository:foo:pull,delete");
}
