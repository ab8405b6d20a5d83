//! The permission resolver.
//!
//! Decisions are assembled from an ordered list of pluggable permission
//! sources, so each grant representation is one more registered source
//! rather than special-cased branching. The resolver itself owns only the
//! administrator bypass, the active-membership resolution, and the union
//! semantics across sources.
//!
//! - No IO of its own (sources and the ledger own their reads)
//! - No panics
//! - Absence of permission is ordinary `false` output, never an error

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use commons_core::{OrganizationId, UserId};

use crate::actor::Actor;
use crate::entity::{EntityKind, EntityRef};
use crate::verb::Verb;

/// A permission source or the membership ledger failed to answer.
///
/// Distinct from a negative decision: this is an infrastructure failure the
/// caller must surface, not "no permission".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    pub source: &'static str,
    pub message: String,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "permission source '{}' failed: {}",
            self.source, self.message
        )
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    pub fn new(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

/// An actor with its active organization set already resolved from the
/// ledger, as seen by permission sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedActor {
    pub user_id: UserId,
    pub organizations: BTreeSet<OrganizationId>,
}

/// Read access to the group membership ledger.
#[async_trait]
pub trait MembershipReader: Send + Sync {
    /// Organizations with any currently active membership row for `user`.
    async fn active_organizations(
        &self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<OrganizationId>, SourceError>;

    /// Whether `user` has any currently active membership in `organization`.
    /// Answerable without a live credential (background work attributed to
    /// its original requester).
    async fn is_active_member(
        &self,
        user: UserId,
        organization: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<bool, SourceError>;
}

/// One registered origin of permissions (legacy-direct, legacy-group,
/// grant-direct, grant-group, ...).
#[async_trait]
pub trait PermissionSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this source grants `verb` over `target` to the actor.
    async fn allows(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        target: &EntityRef,
    ) -> Result<bool, SourceError>;

    /// The ids of `kind` this source lets the actor apply `verb` to, as one
    /// set computation (no per-row checks).
    async fn accessible_ids(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        kind: EntityKind,
    ) -> Result<BTreeSet<Uuid>, SourceError>;
}

/// The id filter a list query applies before pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Administrator bypass: no filtering.
    Unrestricted,
    /// An explicit finite id set.
    Ids(BTreeSet<Uuid>),
}

impl Selector {
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Selector::Unrestricted)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        match self {
            Selector::Unrestricted => true,
            Selector::Ids(ids) => ids.contains(&id),
        }
    }

    /// Intersect with a caller-supplied id filter. An unrestricted selector
    /// narrows to exactly the filter.
    pub fn restrict(self, filter: &BTreeSet<Uuid>) -> Selector {
        match self {
            Selector::Unrestricted => Selector::Ids(filter.clone()),
            Selector::Ids(ids) => Selector::Ids(ids.intersection(filter).copied().collect()),
        }
    }

    pub fn ids(&self) -> Option<&BTreeSet<Uuid>> {
        match self {
            Selector::Unrestricted => None,
            Selector::Ids(ids) => Some(ids),
        }
    }
}

/// Combines the administrator bypass, the membership ledger, and the
/// registered permission sources into boolean checks and set-valued filters.
///
/// Checks are read-only and single-call-scoped: no grant state is cached
/// across calls, so a grant change takes effect on the very next check.
pub struct PermissionResolver {
    ledger: Arc<dyn MembershipReader>,
    sources: Vec<Arc<dyn PermissionSource>>,
}

impl PermissionResolver {
    pub fn new(ledger: Arc<dyn MembershipReader>) -> Self {
        Self {
            ledger,
            sources: Vec::new(),
        }
    }

    pub fn register_source(mut self, source: Arc<dyn PermissionSource>) -> Self {
        self.sources.push(source);
        self
    }

    async fn resolve(&self, actor: &Actor, now: DateTime<Utc>) -> Result<ResolvedActor, SourceError> {
        Ok(ResolvedActor {
            user_id: actor.user_id,
            organizations: self.ledger.active_organizations(actor.user_id, now).await?,
        })
    }

    /// Single-resource yes/no check.
    ///
    /// Administrator → `true` with no lookups performed; otherwise a logical
    /// OR across the registered sources, short-circuiting on the first
    /// `true`. `Manage` is matched as its own verb, never expanded.
    pub async fn has_permission(
        &self,
        actor: &Actor,
        verb: Verb,
        target: &EntityRef,
        now: DateTime<Utc>,
    ) -> Result<bool, SourceError> {
        if actor.is_administrator {
            return Ok(true);
        }

        let resolved = self.resolve(actor, now).await?;
        for source in &self.sources {
            if source.allows(&resolved, verb, target).await? {
                tracing::debug!(
                    source = source.name(),
                    user = %actor.user_id,
                    verb = %verb,
                    target = %target,
                    "permission granted"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Set-valued filter for list queries: the union of every source's
    /// contribution, or `Unrestricted` for administrators.
    pub async fn accessible_ids(
        &self,
        actor: &Actor,
        verb: Verb,
        kind: EntityKind,
        now: DateTime<Utc>,
    ) -> Result<Selector, SourceError> {
        if actor.is_administrator {
            return Ok(Selector::Unrestricted);
        }

        let resolved = self.resolve(actor, now).await?;
        let mut ids = BTreeSet::new();
        for source in &self.sources {
            ids.extend(source.accessible_ids(&resolved, verb, kind).await?);
        }
        Ok(Selector::Ids(ids))
    }

    /// The delegation predicate: administrator, or effective `Manage` over
    /// the entity. Holding it authorizes granting/revoking permissions about
    /// that entity.
    pub async fn may_administer(
        &self,
        actor: &Actor,
        entity: &EntityRef,
        now: DateTime<Utc>,
    ) -> Result<bool, SourceError> {
        if actor.is_administrator {
            return Ok(true);
        }
        self.has_permission(actor, Verb::Manage, entity, now).await
    }
}
