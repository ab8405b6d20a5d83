//! The closed verb enumeration.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use commons_core::DomainError;

/// An allowed action over a protected entity.
///
/// Verbs are a fixed, closed enumeration — there is no user-definable policy
/// language. `Manage` is evaluated as its own distinct value and is never
/// expanded into `View`/`Edit` by the resolver; callers wanting
/// "edit-or-manage" semantics must ask for both.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verb {
    View,
    Edit,
    Manage,
    CreateProposal,
}

impl Verb {
    pub const ALL: [Verb; 4] = [Verb::View, Verb::Edit, Verb::Manage, Verb::CreateProposal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::View => "VIEW",
            Verb::Edit => "EDIT",
            Verb::Manage => "MANAGE",
            Verb::CreateProposal => "CREATE_PROPOSAL",
        }
    }
}

impl core::fmt::Display for Verb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIEW" => Ok(Verb::View),
            "EDIT" => Ok(Verb::Edit),
            "MANAGE" => Ok(Verb::Manage),
            "CREATE_PROPOSAL" => Ok(Verb::CreateProposal),
            other => Err(DomainError::validation(format!(
                "unknown verb '{other}'; expected one of: VIEW, EDIT, MANAGE, CREATE_PROPOSAL"
            ))),
        }
    }
}
