//! The storage trait and error model.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use commons_authz::{
    EntityKind, EntityPermission, EntityRef, GrantFilter, GranteeRef, NewPermissionGrant,
    PermissionGrant, Verb,
};
use commons_core::{DomainError, GrantId, OrganizationId, UserId};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer error.
///
/// Deterministic domain failures (validation, conflicts, not-found) pass
/// through as [`DomainError`]; everything else is a backend failure the
/// caller surfaces as an internal error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Persistence for grants (both shapes), the entity registry, and the group
/// membership ledger.
///
/// Grant checks performed through the read paths are single-call-scoped:
/// implementations must not cache grant state across calls, so a grant
/// change takes effect on the very next check. Entity deletion and the
/// removal of every dependent grant are one transaction — a dangling grant
/// referencing a deleted (and potentially id-reused) entity is a
/// privilege-escalation hazard, not merely orphaned data.
#[async_trait]
pub trait AuthzStore: Send + Sync {
    // ── Entity registry ──────────────────────────────────────────────────

    /// Register a protected entity, with its containing parent when its
    /// kind requires one (opportunity → funder, field value → changemaker).
    async fn register_entity(&self, entity: EntityRef, parent: Option<EntityRef>)
    -> StoreResult<()>;

    async fn entity_exists(&self, entity: &EntityRef) -> StoreResult<bool>;

    /// Delete an entity, its registered descendants, and every legacy and
    /// generalized grant referencing any of them, atomically.
    async fn delete_entity(&self, entity: &EntityRef) -> StoreResult<()>;

    // ── Generalized grants ───────────────────────────────────────────────

    /// Store a new grant. Fails with a validation error on shape violations
    /// and a conflict when the context entity is not registered.
    async fn create_permission_grant(
        &self,
        grant: NewPermissionGrant,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> StoreResult<PermissionGrant>;

    async fn get_permission_grant(&self, id: GrantId) -> StoreResult<PermissionGrant>;

    async fn list_permission_grants(&self, filter: &GrantFilter)
    -> StoreResult<Vec<PermissionGrant>>;

    /// Not-found when absent; deleting is never a silent no-op.
    async fn delete_permission_grant(&self, id: GrantId) -> StoreResult<()>;

    // ── Legacy entity permissions ────────────────────────────────────────

    /// Idempotent upsert of a legacy row (unique per grantee/entity/verb).
    async fn put_entity_permission(&self, permission: EntityPermission) -> StoreResult<()>;

    async fn delete_entity_permission(
        &self,
        grantee: &GranteeRef,
        entity: &EntityRef,
        verb: Verb,
    ) -> StoreResult<()>;

    async fn list_entity_permissions(&self, entity: &EntityRef)
    -> StoreResult<Vec<EntityPermission>>;

    // ── Group membership ledger ──────────────────────────────────────────

    /// Upsert one row per claimed organization with `not_after =
    /// token_expiry`. Idempotent; last write to `not_after` wins. A call
    /// with no claims writes nothing.
    async fn sync_membership(
        &self,
        user: UserId,
        organizations: &[OrganizationId],
        token_expiry: DateTime<Utc>,
    ) -> StoreResult<()>;

    // ── Resolver read paths ──────────────────────────────────────────────
    //
    // Each is one set computation/subquery so list endpoints stay at
    // constant round-trip cost regardless of result size.

    /// Whether any legacy row grants `verb` over `entity` to one of the
    /// grantees.
    async fn legacy_allows(
        &self,
        grantees: &[GranteeRef],
        entity: &EntityRef,
        verb: Verb,
    ) -> StoreResult<bool>;

    /// Entity ids of `kind` covered by legacy rows for the grantees.
    async fn legacy_accessible_ids(
        &self,
        grantees: &[GranteeRef],
        kind: EntityKind,
        verb: Verb,
    ) -> StoreResult<BTreeSet<Uuid>>;

    /// Whether any generalized grant for the grantees covers `target`: the
    /// grant's context is the target or contains it (registered parent
    /// chain), its scope contains the target's kind, its verbs contain
    /// `verb`.
    async fn grant_allows(
        &self,
        grantees: &[GranteeRef],
        target: &EntityRef,
        verb: Verb,
    ) -> StoreResult<bool>;

    /// Entity ids of `kind` covered by generalized grants for the grantees:
    /// the context id itself when the context is of `kind`, otherwise the
    /// registered descendants of `kind` under the context.
    async fn grant_accessible_ids(
        &self,
        grantees: &[GranteeRef],
        kind: EntityKind,
        verb: Verb,
    ) -> StoreResult<BTreeSet<Uuid>>;
}
