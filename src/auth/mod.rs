//! Scopes for the [token authentication][token] of registries.
//!
//! [token]: https://distribution.github.io/distribution/spec/auth/token/

mod challenge;
mod scope;
mod scope_manager;

pub use challenge::Challenge;
pub use scope::{Action, Scope, ScopeParseError};
pub use scope_manager::ScopeManager;
