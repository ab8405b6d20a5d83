//! The registered permission sources.
//!
//! Four sources cover the cross product of grant shape (legacy row,
//! generalized grant) and grantee dimension (the user directly, the user's
//! active organizations). Each is one more entry in the resolver's source
//! list; nothing outside this module knows the split exists.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use commons_authz::{
    EntityKind, EntityRef, GranteeRef, MembershipReader, PermissionResolver, PermissionSource,
    ResolvedActor, SourceError, Verb,
};

use crate::store::{AuthzStore, StoreError};

fn source_failure(name: &'static str, err: StoreError) -> SourceError {
    SourceError::new(name, err.to_string())
}

fn organization_grantees(actor: &ResolvedActor) -> Vec<GranteeRef> {
    actor
        .organizations
        .iter()
        .map(|organization| GranteeRef::Organization(*organization))
        .collect()
}

/// Legacy rows granted to the user directly.
pub struct LegacyDirectSource {
    store: Arc<dyn AuthzStore>,
}

impl LegacyDirectSource {
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PermissionSource for LegacyDirectSource {
    fn name(&self) -> &'static str {
        "legacy-direct"
    }

    async fn allows(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        target: &EntityRef,
    ) -> Result<bool, SourceError> {
        self.store
            .legacy_allows(&[GranteeRef::User(actor.user_id)], target, verb)
            .await
            .map_err(|e| source_failure(self.name(), e))
    }

    async fn accessible_ids(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        kind: EntityKind,
    ) -> Result<BTreeSet<Uuid>, SourceError> {
        self.store
            .legacy_accessible_ids(&[GranteeRef::User(actor.user_id)], kind, verb)
            .await
            .map_err(|e| source_failure(self.name(), e))
    }
}

/// Legacy rows granted to any of the user's active organizations.
pub struct LegacyGroupSource {
    store: Arc<dyn AuthzStore>,
}

impl LegacyGroupSource {
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PermissionSource for LegacyGroupSource {
    fn name(&self) -> &'static str {
        "legacy-group"
    }

    async fn allows(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        target: &EntityRef,
    ) -> Result<bool, SourceError> {
        let grantees = organization_grantees(actor);
        if grantees.is_empty() {
            return Ok(false);
        }
        self.store
            .legacy_allows(&grantees, target, verb)
            .await
            .map_err(|e| source_failure(self.name(), e))
    }

    async fn accessible_ids(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        kind: EntityKind,
    ) -> Result<BTreeSet<Uuid>, SourceError> {
        let grantees = organization_grantees(actor);
        if grantees.is_empty() {
            return Ok(BTreeSet::new());
        }
        self.store
            .legacy_accessible_ids(&grantees, kind, verb)
            .await
            .map_err(|e| source_failure(self.name(), e))
    }
}

/// Generalized grants naming the user directly.
pub struct GrantDirectSource {
    store: Arc<dyn AuthzStore>,
}

impl GrantDirectSource {
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PermissionSource for GrantDirectSource {
    fn name(&self) -> &'static str {
        "grant-direct"
    }

    async fn allows(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        target: &EntityRef,
    ) -> Result<bool, SourceError> {
        self.store
            .grant_allows(&[GranteeRef::User(actor.user_id)], target, verb)
            .await
            .map_err(|e| source_failure(self.name(), e))
    }

    async fn accessible_ids(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        kind: EntityKind,
    ) -> Result<BTreeSet<Uuid>, SourceError> {
        self.store
            .grant_accessible_ids(&[GranteeRef::User(actor.user_id)], kind, verb)
            .await
            .map_err(|e| source_failure(self.name(), e))
    }
}

/// Generalized grants naming any of the user's active organizations.
pub struct GrantGroupSource {
    store: Arc<dyn AuthzStore>,
}

impl GrantGroupSource {
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PermissionSource for GrantGroupSource {
    fn name(&self) -> &'static str {
        "grant-group"
    }

    async fn allows(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        target: &EntityRef,
    ) -> Result<bool, SourceError> {
        let grantees = organization_grantees(actor);
        if grantees.is_empty() {
            return Ok(false);
        }
        self.store
            .grant_allows(&grantees, target, verb)
            .await
            .map_err(|e| source_failure(self.name(), e))
    }

    async fn accessible_ids(
        &self,
        actor: &ResolvedActor,
        verb: Verb,
        kind: EntityKind,
    ) -> Result<BTreeSet<Uuid>, SourceError> {
        let grantees = organization_grantees(actor);
        if grantees.is_empty() {
            return Ok(BTreeSet::new());
        }
        self.store
            .grant_accessible_ids(&grantees, kind, verb)
            .await
            .map_err(|e| source_failure(self.name(), e))
    }
}

/// The standard source list, in evaluation order.
pub fn standard_sources(store: Arc<dyn AuthzStore>) -> Vec<Arc<dyn PermissionSource>> {
    vec![
        Arc::new(LegacyDirectSource::new(store.clone())),
        Arc::new(LegacyGroupSource::new(store.clone())),
        Arc::new(GrantDirectSource::new(store.clone())),
        Arc::new(GrantGroupSource::new(store)),
    ]
}

/// A resolver over a store that doubles as the membership ledger.
pub fn resolver_for<S>(store: Arc<S>) -> PermissionResolver
where
    S: AuthzStore + MembershipReader + 'static,
{
    let ledger: Arc<dyn MembershipReader> = store.clone();
    let store: Arc<dyn AuthzStore> = store;
    let mut resolver = PermissionResolver::new(ledger);
    for source in standard_sources(store) {
        resolver = resolver.register_source(source);
    }
    resolver
}
