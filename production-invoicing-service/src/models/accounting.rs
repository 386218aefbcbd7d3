//! External accounting system credentials and id mappings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::ParseEnumError;

/// Connection to the accounting system. Tokens are never logged.
#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct AccountingCredentials {
    pub credential_id: Uuid,
    pub provider: String,
    pub realm_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_utc: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl AccountingCredentials {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc.is_some_and(|expires| expires <= now)
    }
}

impl fmt::Debug for AccountingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountingCredentials")
            .field("credential_id", &self.credential_id)
            .field("provider", &self.provider)
            .field("realm_id", &self.realm_id)
            .field("expires_utc", &self.expires_utc)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// A token pair issued by the accounting system's refresh grant.
#[derive(Clone, PartialEq)]
pub struct AccountingTokens {
    pub access_token: String,
    /// `None` when the provider kept the previous refresh token valid.
    pub refresh_token: Option<String>,
    pub expires_utc: Option<DateTime<Utc>>,
}

impl fmt::Debug for AccountingTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountingTokens")
            .field("expires_utc", &self.expires_utc)
            .finish_non_exhaustive()
    }
}

/// Local entity kinds that are mirrored in the accounting system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Invoice,
    Payment,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Invoice => "invoice",
            EntityType::Payment => "payment",
        }
    }
}

impl FromStr for EntityType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoice" => Ok(EntityType::Invoice),
            "payment" => Ok(EntityType::Payment),
            other => Err(ParseEnumError::new("entity type", other)),
        }
    }
}

impl TryFrom<String> for EntityType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local id to accounting-system id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct EntityMapping {
    pub mapping_id: Uuid,
    #[sqlx(try_from = "String")]
    pub entity_type: EntityType,
    pub local_id: Uuid,
    pub external_id: String,
    pub synced_utc: DateTime<Utc>,
}
