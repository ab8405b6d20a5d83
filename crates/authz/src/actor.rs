use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use commons_core::{OrganizationId, UserId};

use crate::claims::AuthClaims;

/// The authenticated subject of a permission decision.
///
/// `is_administrator` is derived per-call from a role claim and bypasses
/// grant evaluation entirely; it is never persisted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub is_administrator: bool,
}

/// Per-call actor context, passed explicitly through every call.
///
/// Never carried via ambient/thread-local state: decisions must be
/// reproducible outside the original request lifecycle (e.g. background
/// workers re-evaluating the permissions of whoever triggered the work).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor: Actor,

    /// Organization ids claimed by the credential; synced into the
    /// membership ledger before any permission check runs.
    pub claimed_organizations: Vec<OrganizationId>,

    /// Expiry of the asserting credential; the synced membership rows lapse
    /// at this instant.
    pub token_expiry: DateTime<Utc>,
}

impl ActorContext {
    pub fn from_claims(claims: &AuthClaims) -> Self {
        Self {
            actor: Actor {
                user_id: claims.sub,
                is_administrator: claims.is_administrator,
            },
            claimed_organizations: claims.organizations.clone(),
            token_expiry: claims.expires_at,
        }
    }
}
