//! In-memory store.
//!
//! Intended for tests/dev. A single `RwLock` over the whole state is what
//! makes entity deletion and the cascading removal of dependent grants one
//! atomic section.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use commons_authz::{
    EntityKind, EntityPermission, EntityRef, GrantFilter, GranteeRef, MembershipReader,
    NewPermissionGrant, PermissionGrant, SourceError, Verb, entity,
};
use commons_core::{DomainError, GrantId, OrganizationId, UserId};

use crate::store::{AuthzStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct StoreState {
    /// entity → registered parent (containment edge).
    entities: HashMap<EntityRef, Option<EntityRef>>,
    grants: HashMap<GrantId, PermissionGrant>,
    entity_permissions: HashSet<EntityPermission>,
    /// (user, organization) → `not_after`. One current row per pair;
    /// last write wins.
    memberships: HashMap<(UserId, OrganizationId), Option<DateTime<Utc>>>,
}

/// Walk the registered parent chain, outermost last.
fn ancestors(state: &StoreState, entity: &EntityRef) -> Vec<EntityRef> {
    let mut chain = Vec::new();
    let mut current = *entity;
    while let Some(Some(parent)) = state.entities.get(&current) {
        chain.push(*parent);
        current = *parent;
    }
    chain
}

/// The target itself plus everything that contains it.
fn containment_chain(state: &StoreState, target: &EntityRef) -> Vec<EntityRef> {
    let mut chain = vec![*target];
    chain.extend(ancestors(state, target));
    chain
}

/// The entity plus every registered descendant.
fn doomed_by_delete(state: &StoreState, root: &EntityRef) -> HashSet<EntityRef> {
    let mut doomed: HashSet<EntityRef> = HashSet::new();
    doomed.insert(*root);
    for entity in state.entities.keys() {
        if ancestors(state, entity).contains(root) {
            doomed.insert(*entity);
        }
    }
    doomed
}

#[derive(Debug, Default)]
pub struct InMemoryAuthzStore {
    state: RwLock<StoreState>,
}

impl InMemoryAuthzStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }
}

#[async_trait]
impl AuthzStore for InMemoryAuthzStore {
    async fn register_entity(
        &self,
        entity: EntityRef,
        parent: Option<EntityRef>,
    ) -> StoreResult<()> {
        let mut state = self.write()?;

        if state.entities.contains_key(&entity) {
            return Err(DomainError::conflict(format!("entity {entity} is already registered")).into());
        }

        match (entity::required_parent_kind(entity.kind()), parent) {
            (Some(required), Some(parent)) => {
                if parent.kind() != required {
                    return Err(DomainError::validation(format!(
                        "a {} must be registered under a {required}, not a {}",
                        entity.kind(),
                        parent.kind()
                    ))
                    .into());
                }
                if !state.entities.contains_key(&parent) {
                    return Err(
                        DomainError::conflict(format!("parent entity {parent} is not registered"))
                            .into(),
                    );
                }
                state.entities.insert(entity, Some(parent));
            }
            (Some(required), None) => {
                return Err(DomainError::validation(format!(
                    "a {} must be registered under a {required}",
                    entity.kind()
                ))
                .into());
            }
            (None, Some(_)) => {
                return Err(DomainError::validation(format!(
                    "a {} is a root kind and takes no parent",
                    entity.kind()
                ))
                .into());
            }
            (None, None) => {
                state.entities.insert(entity, None);
            }
        }
        Ok(())
    }

    async fn entity_exists(&self, entity: &EntityRef) -> StoreResult<bool> {
        Ok(self.read()?.entities.contains_key(entity))
    }

    #[tracing::instrument(skip(self), fields(entity = %entity))]
    async fn delete_entity(&self, entity: &EntityRef) -> StoreResult<()> {
        let mut state = self.write()?;

        if !state.entities.contains_key(entity) {
            return Err(DomainError::NotFound.into());
        }

        // One write section: the entity, its descendants, and every grant
        // referencing any of them go together or not at all.
        let doomed = doomed_by_delete(&state, entity);
        state.entities.retain(|e, _| !doomed.contains(e));
        state
            .grants
            .retain(|_, g| !doomed.contains(&g.context.entity_ref()));
        state.entity_permissions.retain(|p| !doomed.contains(&p.entity));

        tracing::debug!(removed = doomed.len(), "entity deleted with dependent grants");
        Ok(())
    }

    async fn create_permission_grant(
        &self,
        grant: NewPermissionGrant,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> StoreResult<PermissionGrant> {
        grant.validate()?;

        let mut state = self.write()?;
        let context_entity = grant.context.entity_ref();
        if !state.entities.contains_key(&context_entity) {
            return Err(
                DomainError::conflict(format!("context entity {context_entity} does not exist"))
                    .into(),
            );
        }

        let stored = PermissionGrant {
            id: GrantId::new(),
            grantee: grant.grantee,
            context: grant.context,
            scope: grant.scope,
            verbs: grant.verbs,
            created_by,
            created_at,
        };
        state.grants.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_permission_grant(&self, id: GrantId) -> StoreResult<PermissionGrant> {
        self.read()?
            .grants
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound.into())
    }

    async fn list_permission_grants(
        &self,
        filter: &GrantFilter,
    ) -> StoreResult<Vec<PermissionGrant>> {
        let state = self.read()?;
        let mut grants: Vec<PermissionGrant> = state
            .grants
            .values()
            .filter(|g| filter.matches(g))
            .cloned()
            .collect();
        grants.sort_by_key(|g| (g.created_at, g.id));
        Ok(grants)
    }

    async fn delete_permission_grant(&self, id: GrantId) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.grants.remove(&id).is_none() {
            return Err(DomainError::NotFound.into());
        }
        Ok(())
    }

    async fn put_entity_permission(&self, permission: EntityPermission) -> StoreResult<()> {
        permission.validate()?;

        let mut state = self.write()?;
        if !state.entities.contains_key(&permission.entity) {
            return Err(DomainError::conflict(format!(
                "entity {} does not exist",
                permission.entity
            ))
            .into());
        }
        state.entity_permissions.insert(permission);
        Ok(())
    }

    async fn delete_entity_permission(
        &self,
        grantee: &GranteeRef,
        entity: &EntityRef,
        verb: Verb,
    ) -> StoreResult<()> {
        let row = EntityPermission {
            grantee: *grantee,
            entity: *entity,
            permission: verb,
        };
        let mut state = self.write()?;
        if !state.entity_permissions.remove(&row) {
            return Err(DomainError::NotFound.into());
        }
        Ok(())
    }

    async fn list_entity_permissions(
        &self,
        entity: &EntityRef,
    ) -> StoreResult<Vec<EntityPermission>> {
        let state = self.read()?;
        let mut rows: Vec<EntityPermission> = state
            .entity_permissions
            .iter()
            .filter(|p| p.entity == *entity)
            .copied()
            .collect();
        rows.sort();
        Ok(rows)
    }

    #[tracing::instrument(skip(self, organizations), fields(user = %user, claims = organizations.len()))]
    async fn sync_membership(
        &self,
        user: UserId,
        organizations: &[OrganizationId],
        token_expiry: DateTime<Utc>,
    ) -> StoreResult<()> {
        if organizations.is_empty() {
            // No claims: previously-valid rows stay authoritative until they
            // lapse.
            return Ok(());
        }
        let mut state = self.write()?;
        for organization in organizations {
            state
                .memberships
                .insert((user, *organization), Some(token_expiry));
        }
        Ok(())
    }

    async fn legacy_allows(
        &self,
        grantees: &[GranteeRef],
        entity: &EntityRef,
        verb: Verb,
    ) -> StoreResult<bool> {
        let state = self.read()?;
        Ok(grantees.iter().any(|grantee| {
            state.entity_permissions.contains(&EntityPermission {
                grantee: *grantee,
                entity: *entity,
                permission: verb,
            })
        }))
    }

    async fn legacy_accessible_ids(
        &self,
        grantees: &[GranteeRef],
        kind: EntityKind,
        verb: Verb,
    ) -> StoreResult<BTreeSet<Uuid>> {
        let state = self.read()?;
        Ok(state
            .entity_permissions
            .iter()
            .filter(|p| {
                p.permission == verb && p.entity.kind() == kind && grantees.contains(&p.grantee)
            })
            .map(|p| p.entity.id())
            .collect())
    }

    async fn grant_allows(
        &self,
        grantees: &[GranteeRef],
        target: &EntityRef,
        verb: Verb,
    ) -> StoreResult<bool> {
        let state = self.read()?;
        let chain = containment_chain(&state, target);
        Ok(state.grants.values().any(|g| {
            grantees.contains(&g.grantee)
                && g.verbs.contains(&verb)
                && g.scope.contains(&target.kind())
                && chain.contains(&g.context.entity_ref())
        }))
    }

    async fn grant_accessible_ids(
        &self,
        grantees: &[GranteeRef],
        kind: EntityKind,
        verb: Verb,
    ) -> StoreResult<BTreeSet<Uuid>> {
        let state = self.read()?;
        let mut ids = BTreeSet::new();
        for grant in state.grants.values() {
            if !grantees.contains(&grant.grantee)
                || !grant.verbs.contains(&verb)
                || !grant.scope.contains(&kind)
            {
                continue;
            }
            if grant.context.kind() == kind {
                ids.insert(grant.context.id());
            } else {
                // Expand a context grant to the registered descendants of
                // the requested kind, so the selector stays consistent with
                // the boolean check.
                let context_entity = grant.context.entity_ref();
                for entity in state.entities.keys() {
                    if entity.kind() == kind && ancestors(&state, entity).contains(&context_entity) {
                        ids.insert(entity.id());
                    }
                }
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl MembershipReader for InMemoryAuthzStore {
    async fn active_organizations(
        &self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<OrganizationId>, SourceError> {
        let state = self
            .read()
            .map_err(|e| SourceError::new("membership-ledger", e.to_string()))?;
        Ok(state
            .memberships
            .iter()
            .filter(|((u, _), not_after)| {
                *u == user && not_after.map(|t| t > now).unwrap_or(true)
            })
            .map(|((_, organization), _)| *organization)
            .collect())
    }

    async fn is_active_member(
        &self,
        user: UserId,
        organization: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<bool, SourceError> {
        let state = self
            .read()
            .map_err(|e| SourceError::new("membership-ledger", e.to_string()))?;
        Ok(state
            .memberships
            .get(&(user, organization))
            .map(|not_after| not_after.map(|t| t > now).unwrap_or(true))
            .unwrap_or(false))
    }
}
