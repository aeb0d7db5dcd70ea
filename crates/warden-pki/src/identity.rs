//! Identity records as persisted under `users/<id>.conf`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kind::IdentityKind;

/// Reserved id of every organization's certificate authority.
pub const CA_IDENTITY_ID: &str = "ca";

/// A certificate-bearing member of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(rename = "organization")]
    pub org_id: String,
    #[serde(rename = "organization_name")]
    pub org_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IdentityKind,
    pub otp_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn is_ca(&self) -> bool {
        self.id == CA_IDENTITY_ID
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// On-disk shape of a record. Records written before identities carried
/// a kind have no `type` field; [`crate::migrate`] fills it in.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    #[serde(rename = "organization")]
    pub org_id: String,
    #[serde(rename = "organization_name", default)]
    pub org_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<IdentityKind>,
    #[serde(default)]
    pub otp_secret: String,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    pub fn into_identity(self, kind: IdentityKind) -> Identity {
        Identity {
            id: self.id,
            org_id: self.org_id,
            org_name: self.org_name,
            name: self.name,
            kind,
            otp_secret: self.otp_secret,
            revoked_at: self.revoked_at,
        }
    }
}

/// Cache key mirroring one persisted record.
pub fn user_cache_key(identity_id: &str) -> String {
    format!("user-{identity_id}")
}

/// Cache set listing the identity ids of one organization.
pub fn org_users_cache_key(org_id: &str) -> String {
    format!("org-{org_id}-users")
}
