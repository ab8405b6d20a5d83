//! `commons-authz` — pure authorization vocabulary and decision logic.
//!
//! This crate is intentionally decoupled from HTTP and storage: it defines
//! the closed verb/entity enumerations, the grant shapes and their
//! validation, token claims, the explicit actor context, and the permission
//! resolver assembled from pluggable permission sources. Storage backends
//! implement the seams ([`MembershipReader`], [`PermissionSource`]) in
//! `commons-store`.

pub mod actor;
pub mod claims;
pub mod entity;
pub mod grant;
pub mod resolver;
pub mod verb;

pub use actor::{Actor, ActorContext};
pub use claims::{AuthClaims, TokenValidationError, TokenVerifier, validate_claims};
pub use entity::{ContextRef, EntityKind, EntityRef};
pub use grant::{EntityPermission, GrantFilter, GranteeKind, GranteeRef, NewPermissionGrant, PermissionGrant};
pub use resolver::{
    MembershipReader, PermissionResolver, PermissionSource, ResolvedActor, Selector, SourceError,
};
pub use verb::Verb;
