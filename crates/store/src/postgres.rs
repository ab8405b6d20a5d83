//! Postgres-backed store.
//!
//! Schema lives in `migrations/0001_authorization.sql`. Entity deletion and
//! the removal of every dependent grant run inside one transaction; the
//! resolver read paths are each a single query so list endpoints stay at
//! constant round-trip cost.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Domain(Conflict)` |
//! | Database (foreign key violation) | `23503` | `Domain(Conflict)` |
//! | anything else | — | `Backend` |

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use commons_authz::{
    ContextRef, EntityKind, EntityPermission, EntityRef, GrantFilter, GranteeRef,
    MembershipReader, NewPermissionGrant, PermissionGrant, SourceError, Verb, entity,
};
use commons_core::{DomainError, GrantId, OrganizationId, UserId};

use crate::store::{AuthzStore, StoreError, StoreResult};

/// Postgres-backed authorization store.
///
/// The SQLx connection pool is `Send + Sync`; one store instance is shared
/// across the whole process.
#[derive(Debug, Clone)]
pub struct PostgresAuthzStore {
    pool: PgPool,
}

impl PostgresAuthzStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }
}

fn map_sqlx_error(op: &'static str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            if code.as_ref() == "23505" {
                return DomainError::conflict(format!("{op}: duplicate row")).into();
            }
            if code.as_ref() == "23503" {
                return DomainError::conflict(format!("{op}: referenced row does not exist")).into();
            }
        }
    }
    StoreError::Backend(format!("{op}: {err}"))
}

fn parse_entity_kind(s: &str) -> StoreResult<EntityKind> {
    s.parse()
        .map_err(|_| StoreError::backend(format!("corrupt entity kind '{s}'")))
}

fn parse_verb(s: &str) -> StoreResult<Verb> {
    s.parse()
        .map_err(|_| StoreError::backend(format!("corrupt verb '{s}'")))
}

fn grantee_from_parts(kind: &str, id: Uuid) -> StoreResult<GranteeRef> {
    match kind {
        "USER" => Ok(GranteeRef::User(id.into())),
        "USER_GROUP" => Ok(GranteeRef::Organization(id.into())),
        other => Err(StoreError::backend(format!("corrupt grantee kind '{other}'"))),
    }
}

/// Split a grantee slice into the user-id and organization-id bind vectors
/// the `= ANY(...)` clauses take.
fn partition_grantees(grantees: &[GranteeRef]) -> (Vec<Uuid>, Vec<Uuid>) {
    let mut users = Vec::new();
    let mut organizations = Vec::new();
    for grantee in grantees {
        match grantee {
            GranteeRef::User(id) => users.push((*id).into()),
            GranteeRef::Organization(id) => organizations.push((*id).into()),
        }
    }
    (users, organizations)
}

fn row_to_grant(row: &PgRow) -> StoreResult<PermissionGrant> {
    let grantee_kind: String = row
        .try_get("grantee_kind")
        .map_err(|e| map_sqlx_error("row_to_grant", e))?;
    let grantee_id: Uuid = row
        .try_get("grantee_id")
        .map_err(|e| map_sqlx_error("row_to_grant", e))?;
    let context_kind: String = row
        .try_get("context_kind")
        .map_err(|e| map_sqlx_error("row_to_grant", e))?;
    let context_id: Uuid = row
        .try_get("context_id")
        .map_err(|e| map_sqlx_error("row_to_grant", e))?;
    let scope: Vec<String> = row
        .try_get("scope")
        .map_err(|e| map_sqlx_error("row_to_grant", e))?;
    let verbs: Vec<String> = row
        .try_get("verbs")
        .map_err(|e| map_sqlx_error("row_to_grant", e))?;
    let id: Uuid = row
        .try_get("id")
        .map_err(|e| map_sqlx_error("row_to_grant", e))?;
    let created_by: Uuid = row
        .try_get("created_by")
        .map_err(|e| map_sqlx_error("row_to_grant", e))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| map_sqlx_error("row_to_grant", e))?;

    let context = ContextRef::from_parts(parse_entity_kind(&context_kind)?, context_id)
        .map_err(|e| StoreError::backend(format!("corrupt context: {e}")))?;

    Ok(PermissionGrant {
        id: GrantId::from_uuid(id),
        grantee: grantee_from_parts(&grantee_kind, grantee_id)?,
        context,
        scope: scope
            .iter()
            .map(|s| parse_entity_kind(s))
            .collect::<StoreResult<BTreeSet<_>>>()?,
        verbs: verbs
            .iter()
            .map(|s| parse_verb(s))
            .collect::<StoreResult<BTreeSet<_>>>()?,
        created_by: UserId::from_uuid(created_by),
        created_at,
    })
}

fn row_to_entity_permission(row: &PgRow) -> StoreResult<EntityPermission> {
    let grantee_kind: String = row
        .try_get("grantee_kind")
        .map_err(|e| map_sqlx_error("row_to_entity_permission", e))?;
    let grantee_id: Uuid = row
        .try_get("grantee_id")
        .map_err(|e| map_sqlx_error("row_to_entity_permission", e))?;
    let entity_kind: String = row
        .try_get("entity_kind")
        .map_err(|e| map_sqlx_error("row_to_entity_permission", e))?;
    let entity_id: Uuid = row
        .try_get("entity_id")
        .map_err(|e| map_sqlx_error("row_to_entity_permission", e))?;
    let permission: String = row
        .try_get("permission")
        .map_err(|e| map_sqlx_error("row_to_entity_permission", e))?;

    Ok(EntityPermission {
        grantee: grantee_from_parts(&grantee_kind, grantee_id)?,
        entity: EntityRef::from_parts(parse_entity_kind(&entity_kind)?, entity_id),
        permission: parse_verb(&permission)?,
    })
}

#[async_trait]
impl AuthzStore for PostgresAuthzStore {
    #[instrument(skip(self), fields(entity = %entity), err)]
    async fn register_entity(
        &self,
        entity: EntityRef,
        parent: Option<EntityRef>,
    ) -> StoreResult<()> {
        match (entity::required_parent_kind(entity.kind()), parent) {
            (Some(required), Some(parent)) if parent.kind() != required => {
                return Err(DomainError::validation(format!(
                    "a {} must be registered under a {required}, not a {}",
                    entity.kind(),
                    parent.kind()
                ))
                .into());
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
            _ => {}
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("register_entity", e))?;

        if let Some(parent) = parent {
            let parent_exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM entities WHERE kind = $1 AND id = $2)",
            )
            .bind(parent.kind().as_str())
            .bind(parent.id())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("register_entity", e))?;
            if !parent_exists {
                return Err(
                    DomainError::conflict(format!("parent entity {parent} is not registered"))
                        .into(),
                );
            }
        }

        let result = sqlx::query(
            r#"
            INSERT INTO entities (kind, id, parent_kind, parent_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (kind, id) DO NOTHING
            "#,
        )
        .bind(entity.kind().as_str())
        .bind(entity.id())
        .bind(parent.map(|p| p.kind().as_str()))
        .bind(parent.map(|p| p.id()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("register_entity", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::conflict(format!("entity {entity} is already registered")).into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("register_entity", e))
    }

    async fn entity_exists(&self, entity: &EntityRef) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM entities WHERE kind = $1 AND id = $2)")
            .bind(entity.kind().as_str())
            .bind(entity.id())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("entity_exists", e))
    }

    #[instrument(skip(self), fields(entity = %entity), err)]
    async fn delete_entity(&self, entity: &EntityRef) -> StoreResult<()> {
        let kind = entity.kind().as_str();
        let id = entity.id();

        // One transaction: the entity, its registered descendants, and every
        // grant referencing any of them go together or not at all.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("delete_entity", e))?;

        sqlx::query(
            r#"
            DELETE FROM permission_grants
            WHERE (context_kind, context_id) IN (
                SELECT kind, id FROM entities
                WHERE (kind = $1 AND id = $2) OR (parent_kind = $1 AND parent_id = $2)
            )
            "#,
        )
        .bind(kind)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_entity", e))?;

        sqlx::query(
            r#"
            DELETE FROM entity_permissions
            WHERE (entity_kind, entity_id) IN (
                SELECT kind, id FROM entities
                WHERE (kind = $1 AND id = $2) OR (parent_kind = $1 AND parent_id = $2)
            )
            "#,
        )
        .bind(kind)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_entity", e))?;

        sqlx::query("DELETE FROM entities WHERE parent_kind = $1 AND parent_id = $2")
            .bind(kind)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_entity", e))?;

        let result = sqlx::query("DELETE FROM entities WHERE kind = $1 AND id = $2")
            .bind(kind)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_entity", e))?;

        if result.rows_affected() == 0 {
            // Implicit rollback on drop.
            return Err(DomainError::NotFound.into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_entity", e))
    }

    #[instrument(skip(self, grant), fields(context = %grant.context, grantee = %grant.grantee), err)]
    async fn create_permission_grant(
        &self,
        grant: NewPermissionGrant,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> StoreResult<PermissionGrant> {
        grant.validate()?;

        let context_entity = grant.context.entity_ref();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create_permission_grant", e))?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM entities WHERE kind = $1 AND id = $2)",
        )
        .bind(context_entity.kind().as_str())
        .bind(context_entity.id())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_permission_grant", e))?;
        if !exists {
            return Err(
                DomainError::conflict(format!("context entity {context_entity} does not exist"))
                    .into(),
            );
        }

        let id = GrantId::new();
        let scope: Vec<String> = grant.scope.iter().map(|k| k.as_str().to_string()).collect();
        let verbs: Vec<String> = grant.verbs.iter().map(|v| v.as_str().to_string()).collect();

        sqlx::query(
            r#"
            INSERT INTO permission_grants
                (id, grantee_kind, grantee_id, context_kind, context_id, scope, verbs, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::from(id))
        .bind(grant.grantee.kind().as_str())
        .bind(grant.grantee.id())
        .bind(grant.context.kind().as_str())
        .bind(grant.context.id())
        .bind(&scope)
        .bind(&verbs)
        .bind(Uuid::from(created_by))
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_permission_grant", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_permission_grant", e))?;

        Ok(PermissionGrant {
            id,
            grantee: grant.grantee,
            context: grant.context,
            scope: grant.scope,
            verbs: grant.verbs,
            created_by,
            created_at,
        })
    }

    async fn get_permission_grant(&self, id: GrantId) -> StoreResult<PermissionGrant> {
        let row = sqlx::query("SELECT * FROM permission_grants WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_permission_grant", e))?;
        match row {
            Some(row) => row_to_grant(&row),
            None => Err(DomainError::NotFound.into()),
        }
    }

    async fn list_permission_grants(
        &self,
        filter: &GrantFilter,
    ) -> StoreResult<Vec<PermissionGrant>> {
        let grantee_kind = filter.grantee.map(|g| g.kind().as_str().to_string());
        let grantee_id = filter.grantee.map(|g| g.id());
        let context_kind = filter.context.map(|c| c.kind().as_str().to_string());
        let context_id = filter.context.map(|c| c.id());

        let rows = sqlx::query(
            r#"
            SELECT * FROM permission_grants
            WHERE ($1::text IS NULL OR (grantee_kind = $1 AND grantee_id = $2::uuid))
              AND ($3::text IS NULL OR (context_kind = $3 AND context_id = $4::uuid))
            ORDER BY created_at, id
            "#,
        )
        .bind(grantee_kind)
        .bind(grantee_id)
        .bind(context_kind)
        .bind(context_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_permission_grants", e))?;

        rows.iter().map(row_to_grant).collect()
    }

    async fn delete_permission_grant(&self, id: GrantId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM permission_grants WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_permission_grant", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound.into());
        }
        Ok(())
    }

    async fn put_entity_permission(&self, permission: EntityPermission) -> StoreResult<()> {
        permission.validate()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("put_entity_permission", e))?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM entities WHERE kind = $1 AND id = $2)",
        )
        .bind(permission.entity.kind().as_str())
        .bind(permission.entity.id())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("put_entity_permission", e))?;
        if !exists {
            return Err(DomainError::conflict(format!(
                "entity {} does not exist",
                permission.entity
            ))
            .into());
        }

        sqlx::query(
            r#"
            INSERT INTO entity_permissions (grantee_kind, grantee_id, entity_kind, entity_id, permission)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(permission.grantee.kind().as_str())
        .bind(permission.grantee.id())
        .bind(permission.entity.kind().as_str())
        .bind(permission.entity.id())
        .bind(permission.permission.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("put_entity_permission", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("put_entity_permission", e))
    }

    async fn delete_entity_permission(
        &self,
        grantee: &GranteeRef,
        entity: &EntityRef,
        verb: Verb,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM entity_permissions
            WHERE grantee_kind = $1 AND grantee_id = $2
              AND entity_kind = $3 AND entity_id = $4 AND permission = $5
            "#,
        )
        .bind(grantee.kind().as_str())
        .bind(grantee.id())
        .bind(entity.kind().as_str())
        .bind(entity.id())
        .bind(verb.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_entity_permission", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound.into());
        }
        Ok(())
    }

    async fn list_entity_permissions(
        &self,
        entity: &EntityRef,
    ) -> StoreResult<Vec<EntityPermission>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM entity_permissions
            WHERE entity_kind = $1 AND entity_id = $2
            ORDER BY grantee_kind, grantee_id, permission
            "#,
        )
        .bind(entity.kind().as_str())
        .bind(entity.id())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_entity_permissions", e))?;

        rows.iter().map(row_to_entity_permission).collect()
    }

    #[instrument(skip(self, organizations), fields(user = %user, claims = organizations.len()), err)]
    async fn sync_membership(
        &self,
        user: UserId,
        organizations: &[OrganizationId],
        token_expiry: DateTime<Utc>,
    ) -> StoreResult<()> {
        if organizations.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("sync_membership", e))?;

        for organization in organizations {
            sqlx::query(
                r#"
                INSERT INTO organization_memberships (user_id, organization_id, not_after)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id, organization_id)
                DO UPDATE SET not_after = EXCLUDED.not_after
                "#,
            )
            .bind(Uuid::from(user))
            .bind(Uuid::from(*organization))
            .bind(token_expiry)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("sync_membership", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("sync_membership", e))
    }

    async fn legacy_allows(
        &self,
        grantees: &[GranteeRef],
        entity: &EntityRef,
        verb: Verb,
    ) -> StoreResult<bool> {
        let (users, organizations) = partition_grantees(grantees);
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM entity_permissions
                WHERE entity_kind = $1 AND entity_id = $2 AND permission = $3
                  AND ((grantee_kind = 'USER' AND grantee_id = ANY($4))
                       OR (grantee_kind = 'USER_GROUP' AND grantee_id = ANY($5)))
            )
            "#,
        )
        .bind(entity.kind().as_str())
        .bind(entity.id())
        .bind(verb.as_str())
        .bind(&users)
        .bind(&organizations)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("legacy_allows", e))
    }

    async fn legacy_accessible_ids(
        &self,
        grantees: &[GranteeRef],
        kind: EntityKind,
        verb: Verb,
    ) -> StoreResult<BTreeSet<Uuid>> {
        let (users, organizations) = partition_grantees(grantees);
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT entity_id FROM entity_permissions
            WHERE entity_kind = $1 AND permission = $2
              AND ((grantee_kind = 'USER' AND grantee_id = ANY($3))
                   OR (grantee_kind = 'USER_GROUP' AND grantee_id = ANY($4)))
            "#,
        )
        .bind(kind.as_str())
        .bind(verb.as_str())
        .bind(&users)
        .bind(&organizations)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("legacy_accessible_ids", e))?;
        Ok(ids.into_iter().collect())
    }

    async fn grant_allows(
        &self,
        grantees: &[GranteeRef],
        target: &EntityRef,
        verb: Verb,
    ) -> StoreResult<bool> {
        let (users, organizations) = partition_grantees(grantees);
        // The context matches when it is the target itself or the target's
        // registered parent (containment is one edge deep by construction).
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM permission_grants g
                WHERE $1 = ANY(g.verbs) AND $2 = ANY(g.scope)
                  AND ((g.grantee_kind = 'USER' AND g.grantee_id = ANY($4))
                       OR (g.grantee_kind = 'USER_GROUP' AND g.grantee_id = ANY($5)))
                  AND ((g.context_kind = $2 AND g.context_id = $3)
                       OR EXISTS (
                           SELECT 1 FROM entities e
                           WHERE e.kind = $2 AND e.id = $3
                             AND e.parent_kind = g.context_kind AND e.parent_id = g.context_id
                       ))
            )
            "#,
        )
        .bind(verb.as_str())
        .bind(target.kind().as_str())
        .bind(target.id())
        .bind(&users)
        .bind(&organizations)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("grant_allows", e))
    }

    async fn grant_accessible_ids(
        &self,
        grantees: &[GranteeRef],
        kind: EntityKind,
        verb: Verb,
    ) -> StoreResult<BTreeSet<Uuid>> {
        let (users, organizations) = partition_grantees(grantees);
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT g.context_id AS id FROM permission_grants g
            WHERE g.context_kind = $1 AND $1 = ANY(g.scope) AND $2 = ANY(g.verbs)
              AND ((g.grantee_kind = 'USER' AND g.grantee_id = ANY($3))
                   OR (g.grantee_kind = 'USER_GROUP' AND g.grantee_id = ANY($4)))
            UNION
            SELECT e.id FROM entities e
            JOIN permission_grants g
              ON g.context_kind = e.parent_kind AND g.context_id = e.parent_id
            WHERE e.kind = $1 AND $1 = ANY(g.scope) AND $2 = ANY(g.verbs)
              AND ((g.grantee_kind = 'USER' AND g.grantee_id = ANY($3))
                   OR (g.grantee_kind = 'USER_GROUP' AND g.grantee_id = ANY($4)))
            "#,
        )
        .bind(kind.as_str())
        .bind(verb.as_str())
        .bind(&users)
        .bind(&organizations)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("grant_accessible_ids", e))?;
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl MembershipReader for PostgresAuthzStore {
    async fn active_organizations(
        &self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<OrganizationId>, SourceError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT organization_id FROM organization_memberships
            WHERE user_id = $1 AND (not_after IS NULL OR not_after > $2)
            "#,
        )
        .bind(Uuid::from(user))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SourceError::new("membership-ledger", e.to_string()))?;
        Ok(ids.into_iter().map(OrganizationId::from_uuid).collect())
    }

    async fn is_active_member(
        &self,
        user: UserId,
        organization: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<bool, SourceError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM organization_memberships
                WHERE user_id = $1 AND organization_id = $2
                  AND (not_after IS NULL OR not_after > $3)
            )
            "#,
        )
        .bind(Uuid::from(user))
        .bind(Uuid::from(organization))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SourceError::new("membership-ledger", e.to_string()))
    }
}
