//! Grant shapes and their validation.
//!
//! Two persisted representations coexist (an in-progress migration the
//! administration surface still has to serve): the legacy per-entity
//! [`EntityPermission`] row and the generalized polymorphic
//! [`PermissionGrant`]. The resolver unifies them behind registered
//! permission sources; nothing else special-cases the split.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use commons_core::{DomainError, DomainResult, GrantId, OrganizationId, UserId};

use crate::entity::{self, ContextRef, EntityKind, EntityRef};
use crate::verb::Verb;

/// The kind of grantee a grant names.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GranteeKind {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "USER_GROUP")]
    UserGroup,
}

impl GranteeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GranteeKind::User => "USER",
            GranteeKind::UserGroup => "USER_GROUP",
        }
    }
}

impl core::fmt::Display for GranteeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subject of a grant: a single user, or an entire organization.
///
/// The wire shape's (granteeType, one-of-two id columns) pair is a tagged
/// union here: a mismatched combination is unrepresentable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
pub enum GranteeRef {
    #[serde(rename = "USER")]
    User(UserId),
    #[serde(rename = "USER_GROUP")]
    Organization(OrganizationId),
}

impl GranteeRef {
    pub fn kind(&self) -> GranteeKind {
        match self {
            GranteeRef::User(_) => GranteeKind::User,
            GranteeRef::Organization(_) => GranteeKind::UserGroup,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            GranteeRef::User(id) => (*id).into(),
            GranteeRef::Organization(id) => (*id).into(),
        }
    }
}

impl core::fmt::Display for GranteeRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.kind(), self.id())
    }
}

/// A generalized polymorphic permission grant.
///
/// # Invariants
/// - `scope` and `verbs` are non-empty.
/// - Every scope kind is permitted for the context kind by
///   [`entity::SCOPE_ALLOW_LIST`].
/// - Created and removed only via the administration API; a changed verb set
///   is delete + recreate, never in-place mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: GrantId,
    pub grantee: GranteeRef,
    pub context: ContextRef,
    pub scope: BTreeSet<EntityKind>,
    pub verbs: BTreeSet<Verb>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// A grant as requested, before it is stored and assigned an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermissionGrant {
    pub grantee: GranteeRef,
    pub context: ContextRef,
    pub scope: BTreeSet<EntityKind>,
    pub verbs: BTreeSet<Verb>,
}

impl NewPermissionGrant {
    /// Validate shape invariants. Referential checks (does the context
    /// entity exist) belong to the store.
    pub fn validate(&self) -> DomainResult<()> {
        if self.scope.is_empty() {
            return Err(DomainError::validation("grant scope must not be empty"));
        }
        if self.verbs.is_empty() {
            return Err(DomainError::validation("grant verbs must not be empty"));
        }
        let context_kind = self.context.kind();
        for kind in &self.scope {
            if !entity::scope_allows(context_kind, *kind) {
                return Err(DomainError::validation(format!(
                    "scope kind '{kind}' is not permitted for a {context_kind} context"
                )));
            }
        }
        Ok(())
    }
}

/// A legacy single-entity permission row.
///
/// Unique per (grantee, entity, permission); setting an existing row again
/// is an idempotent upsert.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityPermission {
    pub grantee: GranteeRef,
    pub entity: EntityRef,
    pub permission: Verb,
}

impl EntityPermission {
    pub fn validate(&self) -> DomainResult<()> {
        let kind = self.entity.kind();
        if !entity::supports_legacy_permissions(kind) {
            return Err(DomainError::validation(format!(
                "entity kind '{kind}' does not support legacy permission rows"
            )));
        }
        if self.permission == Verb::CreateProposal && kind != EntityKind::Opportunity {
            return Err(DomainError::validation(
                "CREATE_PROPOSAL is only valid on opportunities",
            ));
        }
        Ok(())
    }
}

/// Filter for listing generalized grants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantFilter {
    pub grantee: Option<GranteeRef>,
    pub context: Option<ContextRef>,
}

impl GrantFilter {
    pub fn matches(&self, grant: &PermissionGrant) -> bool {
        if let Some(grantee) = &self.grantee {
            if grant.grantee != *grantee {
                return false;
            }
        }
        if let Some(context) = &self.context {
            if grant.context != *context {
                return false;
            }
        }
        true
    }
}
