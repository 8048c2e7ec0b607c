mod descriptor;
mod digest;
mod index;
mod media_type;
mod referrers;

pub mod auth;
pub mod reference;
pub mod remote;

pub use descriptor::{BasicDescriptor, Descriptor, Platform};
pub use digest::{Digest, DigestAlgorithm, DigestError};
pub use index::Index;
pub use media_type::{InvalidMediaType, MediaType, EMPTY_CONFIG};
pub use reference::Reference;
pub use referrers::{
    apply_referrer_changes, build_referrers_tag, ReferrerChange, ReferrerOperation,
    ReferrersError, ReferrersState,
};
