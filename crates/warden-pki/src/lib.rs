//! Identity certificate lifecycle for VPN organizations.
//!
//! An organization owns a CA and any number of server and client
//! identities. [`lifecycle::IdentityManager`] drives each identity
//! through request, signing, revocation and removal against a
//! [`engine::CaEngine`], serializing engine work per identity through
//! [`locks::IdentityLockTable`]. [`bundle`] turns a signed client
//! identity into connection profiles for every server of its org.

pub mod audit;
pub mod bundle;
pub mod cleanup;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod kind;
pub mod layout;
pub mod lifecycle;
pub mod locks;
pub mod migrate;
pub mod native;
pub mod org;
pub mod profile;
pub mod settings;
pub mod sslconf;

pub use engine::{CaEngine, EngineError, RevocationReason, RevokeOutcome, SigningJob};
pub use error::PkiError;
pub use identity::{Identity, CA_IDENTITY_ID};
pub use kind::IdentityKind;
pub use lifecycle::{CertState, IdentityManager};
pub use org::{FileOrganization, Organization, ServerProfile};
pub use settings::PkiSettings;
