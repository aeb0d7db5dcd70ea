use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role an identity's certificate plays in its organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Ca,
    Server,
    Client,
}

/// (certificate extensions, request extensions) per kind, indexed by
/// the enum discriminant.
const EXTENSION_SECTIONS: [(&str, &str); 3] = [
    ("ca_ext", "ca_req_ext"),
    ("server_ext", "server_req_ext"),
    ("client_ext", "client_req_ext"),
];

impl IdentityKind {
    pub const ALL: [IdentityKind; 3] = [Self::Ca, Self::Server, Self::Client];

    /// Signing-config section applied when the certificate is issued.
    pub fn ext_section(self) -> &'static str {
        EXTENSION_SECTIONS[self as usize].0
    }

    /// Signing-config section applied to the signing request.
    pub fn req_ext_section(self) -> &'static str {
        EXTENSION_SECTIONS[self as usize].1
    }

    /// CA certificates sign themselves; everything else is signed by the CA.
    pub fn is_self_signed(self) -> bool {
        self == Self::Ca
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ca => "ca",
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown identity kind: {s}"))
    }
}
