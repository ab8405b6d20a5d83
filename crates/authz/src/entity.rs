//! Protected entity kinds, typed entity references, and the scope allow-list.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use commons_core::{
    ChangemakerId, DataProviderId, DomainError, DomainResult, FieldValueId, FunderId,
    OpportunityId, SourceId,
};

/// The closed set of protected entity kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Funder,
    Changemaker,
    DataProvider,
    Source,
    Opportunity,
    ChangemakerFieldValue,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Funder,
        EntityKind::Changemaker,
        EntityKind::DataProvider,
        EntityKind::Source,
        EntityKind::Opportunity,
        EntityKind::ChangemakerFieldValue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Funder => "funder",
            EntityKind::Changemaker => "changemaker",
            EntityKind::DataProvider => "data_provider",
            EntityKind::Source => "source",
            EntityKind::Opportunity => "opportunity",
            EntityKind::ChangemakerFieldValue => "changemaker_field_value",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "funder" => Ok(EntityKind::Funder),
            "changemaker" => Ok(EntityKind::Changemaker),
            "data_provider" => Ok(EntityKind::DataProvider),
            "source" => Ok(EntityKind::Source),
            "opportunity" => Ok(EntityKind::Opportunity),
            "changemaker_field_value" => Ok(EntityKind::ChangemakerFieldValue),
            other => Err(DomainError::validation(format!(
                "unknown entity kind '{other}'; expected one of: funder, changemaker, \
                 data_provider, source, opportunity, changemaker_field_value"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scope allow-list
// ─────────────────────────────────────────────────────────────────────────────

/// The legal (context kind → permitted scope kinds) table.
///
/// Single source of truth: grant validation, resolution, and documentation
/// all consult this table. A grant anchored to a context entity may only
/// scope its verbs to the kinds listed for that context.
pub const SCOPE_ALLOW_LIST: &[(EntityKind, &[EntityKind])] = &[
    (EntityKind::Funder, &[EntityKind::Funder, EntityKind::Opportunity]),
    (
        EntityKind::Changemaker,
        &[EntityKind::Changemaker, EntityKind::ChangemakerFieldValue],
    ),
    (EntityKind::DataProvider, &[EntityKind::DataProvider]),
    (EntityKind::Source, &[EntityKind::Source]),
];

/// Scope kinds permitted for a context kind; empty for kinds that cannot
/// anchor a grant.
pub fn allowed_scope(context: EntityKind) -> &'static [EntityKind] {
    SCOPE_ALLOW_LIST
        .iter()
        .find(|(kind, _)| *kind == context)
        .map(|(_, scope)| *scope)
        .unwrap_or(&[])
}

pub fn is_context_kind(kind: EntityKind) -> bool {
    !allowed_scope(kind).is_empty()
}

pub fn scope_allows(context: EntityKind, target: EntityKind) -> bool {
    allowed_scope(context).contains(&target)
}

/// Entity kinds the legacy per-entity permission rows may reference.
pub const LEGACY_ENTITY_KINDS: [EntityKind; 4] = [
    EntityKind::Funder,
    EntityKind::Changemaker,
    EntityKind::DataProvider,
    EntityKind::Opportunity,
];

pub fn supports_legacy_permissions(kind: EntityKind) -> bool {
    LEGACY_ENTITY_KINDS.contains(&kind)
}

/// Kinds that are sub-resources of a containing entity must be registered
/// with a parent of this kind; root kinds must be registered without one.
pub fn required_parent_kind(kind: EntityKind) -> Option<EntityKind> {
    match kind {
        EntityKind::Opportunity => Some(EntityKind::Funder),
        EntityKind::ChangemakerFieldValue => Some(EntityKind::Changemaker),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed references
// ─────────────────────────────────────────────────────────────────────────────

/// A typed reference to a protected entity instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Funder(FunderId),
    Changemaker(ChangemakerId),
    DataProvider(DataProviderId),
    Source(SourceId),
    Opportunity(OpportunityId),
    ChangemakerFieldValue(FieldValueId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Funder(_) => EntityKind::Funder,
            EntityRef::Changemaker(_) => EntityKind::Changemaker,
            EntityRef::DataProvider(_) => EntityKind::DataProvider,
            EntityRef::Source(_) => EntityKind::Source,
            EntityRef::Opportunity(_) => EntityKind::Opportunity,
            EntityRef::ChangemakerFieldValue(_) => EntityKind::ChangemakerFieldValue,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            EntityRef::Funder(id) => (*id).into(),
            EntityRef::Changemaker(id) => (*id).into(),
            EntityRef::DataProvider(id) => (*id).into(),
            EntityRef::Source(id) => (*id).into(),
            EntityRef::Opportunity(id) => (*id).into(),
            EntityRef::ChangemakerFieldValue(id) => (*id).into(),
        }
    }

    pub fn from_parts(kind: EntityKind, id: Uuid) -> Self {
        match kind {
            EntityKind::Funder => EntityRef::Funder(id.into()),
            EntityKind::Changemaker => EntityRef::Changemaker(id.into()),
            EntityKind::DataProvider => EntityRef::DataProvider(id.into()),
            EntityKind::Source => EntityRef::Source(id.into()),
            EntityKind::Opportunity => EntityRef::Opportunity(id.into()),
            EntityKind::ChangemakerFieldValue => EntityRef::ChangemakerFieldValue(id.into()),
        }
    }
}

impl core::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.kind(), self.id())
    }
}

/// A typed reference to a grant's context entity.
///
/// The wire shape's (contextEntityType, one-of-several FK columns) pair is a
/// tagged union here: an invalid combination is unrepresentable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ContextRef {
    Funder(FunderId),
    Changemaker(ChangemakerId),
    DataProvider(DataProviderId),
    Source(SourceId),
}

impl ContextRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            ContextRef::Funder(_) => EntityKind::Funder,
            ContextRef::Changemaker(_) => EntityKind::Changemaker,
            ContextRef::DataProvider(_) => EntityKind::DataProvider,
            ContextRef::Source(_) => EntityKind::Source,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            ContextRef::Funder(id) => (*id).into(),
            ContextRef::Changemaker(id) => (*id).into(),
            ContextRef::DataProvider(id) => (*id).into(),
            ContextRef::Source(id) => (*id).into(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        match self {
            ContextRef::Funder(id) => EntityRef::Funder(*id),
            ContextRef::Changemaker(id) => EntityRef::Changemaker(*id),
            ContextRef::DataProvider(id) => EntityRef::DataProvider(*id),
            ContextRef::Source(id) => EntityRef::Source(*id),
        }
    }

    pub fn from_parts(kind: EntityKind, id: Uuid) -> DomainResult<Self> {
        match kind {
            EntityKind::Funder => Ok(ContextRef::Funder(id.into())),
            EntityKind::Changemaker => Ok(ContextRef::Changemaker(id.into())),
            EntityKind::DataProvider => Ok(ContextRef::DataProvider(id.into())),
            EntityKind::Source => Ok(ContextRef::Source(id.into())),
            other => Err(DomainError::validation(format!(
                "entity kind '{other}' cannot anchor a permission grant"
            ))),
        }
    }

    pub fn from_entity_ref(entity: EntityRef) -> DomainResult<Self> {
        Self::from_parts(entity.kind(), entity.id())
    }
}

impl core::fmt::Display for ContextRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.kind(), self.id())
    }
}
