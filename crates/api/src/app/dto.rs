//! Request/response shapes and JSON mapping helpers.
//!
//! Request enums arrive as strings and are parsed explicitly so malformed
//! values are rejected as validation failures before any permission
//! evaluation. The create-grant request carries the wire's nullable
//! identifier columns; `into_new_grant` collapses them into the tagged
//! unions, rejecting a zero or more-than-one identifier shape.

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use commons_authz::{
    ContextRef, EntityKind, EntityPermission, EntityRef, GrantFilter, GranteeRef,
    NewPermissionGrant, PermissionGrant, Verb,
};
use commons_core::{DomainError, DomainResult};

#[derive(Debug, Deserialize)]
pub struct CreateGrantRequest {
    pub grantee_type: String,
    pub user_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub context_entity_type: String,
    pub funder_id: Option<Uuid>,
    pub changemaker_id: Option<Uuid>,
    pub data_provider_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub verbs: Vec<String>,
}

impl CreateGrantRequest {
    pub fn into_new_grant(self) -> DomainResult<NewPermissionGrant> {
        let grantee = match self.grantee_type.as_str() {
            "USER" => match (self.user_id, self.organization_id) {
                (Some(user), None) => GranteeRef::User(user.into()),
                _ => {
                    return Err(DomainError::validation(
                        "a USER grantee requires exactly user_id to be populated",
                    ));
                }
            },
            "USER_GROUP" => match (self.user_id, self.organization_id) {
                (None, Some(organization)) => GranteeRef::Organization(organization.into()),
                _ => {
                    return Err(DomainError::validation(
                        "a USER_GROUP grantee requires exactly organization_id to be populated",
                    ));
                }
            },
            other => {
                return Err(DomainError::validation(format!(
                    "unknown grantee type '{other}'; expected USER or USER_GROUP"
                )));
            }
        };

        let context_kind: EntityKind = self.context_entity_type.parse()?;
        let populated: Vec<(EntityKind, Uuid)> = [
            (EntityKind::Funder, self.funder_id),
            (EntityKind::Changemaker, self.changemaker_id),
            (EntityKind::DataProvider, self.data_provider_id),
            (EntityKind::Source, self.source_id),
        ]
        .into_iter()
        .filter_map(|(kind, id)| id.map(|id| (kind, id)))
        .collect();

        let context = match populated.as_slice() {
            [(kind, id)] if *kind == context_kind => ContextRef::from_parts(*kind, *id)?,
            [(_, _)] => {
                return Err(DomainError::validation(
                    "the populated context identifier does not match context_entity_type",
                ));
            }
            [] => {
                return Err(DomainError::validation(
                    "exactly one context identifier must be populated",
                ));
            }
            _ => {
                return Err(DomainError::validation(
                    "more than one context identifier is populated",
                ));
            }
        };

        Ok(NewPermissionGrant {
            grantee,
            context,
            scope: self
                .scope
                .iter()
                .map(|s| s.parse::<EntityKind>())
                .collect::<DomainResult<_>>()?,
            verbs: self
                .verbs
                .iter()
                .map(|s| s.parse::<Verb>())
                .collect::<DomainResult<_>>()?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListGrantsQuery {
    pub grantee_type: Option<String>,
    pub grantee_id: Option<Uuid>,
    pub context_entity_type: Option<String>,
    pub context_entity_id: Option<Uuid>,
}

impl ListGrantsQuery {
    pub fn into_filter(self) -> DomainResult<GrantFilter> {
        let grantee = match (self.grantee_type.as_deref(), self.grantee_id) {
            (None, None) => None,
            (Some("USER"), Some(id)) => Some(GranteeRef::User(id.into())),
            (Some("USER_GROUP"), Some(id)) => Some(GranteeRef::Organization(id.into())),
            (Some(other), Some(_)) => {
                return Err(DomainError::validation(format!(
                    "unknown grantee type '{other}'; expected USER or USER_GROUP"
                )));
            }
            _ => {
                return Err(DomainError::validation(
                    "grantee_type and grantee_id must be supplied together",
                ));
            }
        };

        let context = match (self.context_entity_type.as_deref(), self.context_entity_id) {
            (None, None) => None,
            (Some(kind), Some(id)) => Some(ContextRef::from_parts(kind.parse()?, id)?),
            _ => {
                return Err(DomainError::validation(
                    "context_entity_type and context_entity_id must be supplied together",
                ));
            }
        };

        Ok(GrantFilter { grantee, context })
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterEntityRequest {
    pub kind: String,
    pub id: Option<Uuid>,
    pub parent_kind: Option<String>,
    pub parent_id: Option<Uuid>,
}

impl RegisterEntityRequest {
    pub fn into_parts(self) -> DomainResult<(EntityRef, Option<EntityRef>)> {
        let kind: EntityKind = self.kind.parse()?;
        let entity = EntityRef::from_parts(kind, self.id.unwrap_or_else(Uuid::now_v7));

        let parent = match (self.parent_kind, self.parent_id) {
            (None, None) => None,
            (Some(parent_kind), Some(parent_id)) => {
                Some(EntityRef::from_parts(parent_kind.parse()?, parent_id))
            }
            _ => {
                return Err(DomainError::validation(
                    "parent_kind and parent_id must be supplied together",
                ));
            }
        };

        Ok((entity, parent))
    }
}

/// Query string of the list-scoping endpoint: the verb to filter by, and an
/// optional comma-separated id filter the selector is intersected with.
#[derive(Debug, Deserialize)]
pub struct AccessibleIdsQuery {
    pub verb: String,
    pub ids: Option<String>,
}

/// Path segment naming a grantee dimension on the legacy routes.
pub fn parse_grantee_segment(segment: &str, id: Uuid) -> DomainResult<GranteeRef> {
    match segment {
        "users" => Ok(GranteeRef::User(id.into())),
        "groups" => Ok(GranteeRef::Organization(id.into())),
        other => Err(DomainError::validation(format!(
            "unknown grantee segment '{other}'; expected users or groups"
        ))),
    }
}

pub fn grant_to_json(grant: &PermissionGrant) -> serde_json::Value {
    let (user_id, organization_id) = match grant.grantee {
        GranteeRef::User(id) => (Some(id.to_string()), None),
        GranteeRef::Organization(id) => (None, Some(id.to_string())),
    };

    json!({
        "id": grant.id.to_string(),
        "grantee_type": grant.grantee.kind().as_str(),
        "user_id": user_id,
        "organization_id": organization_id,
        "context_entity_type": grant.context.kind().as_str(),
        "context_entity_id": grant.context.id().to_string(),
        "scope": grant.scope.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
        "verbs": grant.verbs.iter().map(|v| v.as_str()).collect::<Vec<_>>(),
        "created_by": grant.created_by.to_string(),
        "created_at": grant.created_at,
    })
}

pub fn entity_permission_to_json(row: &EntityPermission) -> serde_json::Value {
    json!({
        "grantee_type": row.grantee.kind().as_str(),
        "grantee_id": row.grantee.id().to_string(),
        "entity_type": row.entity.kind().as_str(),
        "entity_id": row.entity.id().to_string(),
        "permission": row.permission.as_str(),
    })
}
