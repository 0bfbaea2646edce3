use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, UserId};

/// Identity handed to the engine by the external auth collaborator.
///
/// Issuance and verification happen elsewhere; the engine stores and
/// returns what it was given and never derives anything from the name
/// or email.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl AuthenticatedUser {
    pub fn new(id: UserId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Listing category a conversation is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Lost,
    Found,
    Donation,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lost => "lost",
            Self::Found => "found",
            Self::Donation => "donation",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lost" => Ok(Self::Lost),
            "found" => Ok(Self::Found),
            "donation" => Ok(Self::Donation),
            other => Err(format!("unknown item kind: {other}")),
        }
    }
}

/// Reference to an item listing. Existence is not validated here; the
/// listing service owns the item itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: ItemId,
    pub kind: ItemKind,
}

impl ItemRef {
    pub fn new(id: ItemId, kind: ItemKind) -> Self {
        Self { id, kind }
    }
}
