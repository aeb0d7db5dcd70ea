//! CA engine seam.
//!
//! Every certificate operation goes through [`CaEngine`]. The default
//! [`OpensslEngine`] drives the `openssl` binary against the org's CA
//! database; [`crate::native::RcgenEngine`] does the same work in
//! process. Engines are blocking and carry no timeout.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::kind::IdentityKind;
use crate::layout::IdentityPaths;

/// stderr marker `openssl ca -revoke` prints for a repeat revocation.
const ALREADY_REVOKED_MARKER: &str = "ERROR:Already revoked";

/// Inputs for one engine call against one identity.
#[derive(Debug, Clone, Copy)]
pub struct SigningJob<'a> {
    pub org_id: &'a str,
    pub org_root: &'a Path,
    pub identity_id: &'a str,
    pub kind: IdentityKind,
    pub config_path: &'a Path,
    pub request_path: &'a Path,
    pub key_path: &'a Path,
    pub cert_path: &'a Path,
}

impl<'a> SigningJob<'a> {
    pub fn new(
        org_id: &'a str,
        org_root: &'a Path,
        identity_id: &'a str,
        kind: IdentityKind,
        paths: &'a IdentityPaths,
    ) -> Self {
        Self {
            org_id,
            org_root,
            identity_id,
            kind,
            config_path: &paths.ssl_conf,
            request_path: &paths.request,
            key_path: &paths.key,
            cert_path: &paths.cert,
        }
    }
}

/// Inputs for regenerating an org's revocation list.
#[derive(Debug, Clone, Copy)]
pub struct CrlJob<'a> {
    pub org_root: &'a Path,
    pub config_path: &'a Path,
    pub crl_path: &'a Path,
}

/// CRL reason codes accepted by `openssl ca -crl_reason`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    #[default]
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
}

impl RevocationReason {
    pub fn as_openssl(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "keyCompromise",
            Self::CaCompromise => "CACompromise",
            Self::AffiliationChanged => "affiliationChanged",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessationOfOperation",
        }
    }
}

impl std::str::FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['-', '_'], "").to_ascii_lowercase();
        [
            Self::Unspecified,
            Self::KeyCompromise,
            Self::CaCompromise,
            Self::AffiliationChanged,
            Self::Superseded,
            Self::CessationOfOperation,
        ]
        .into_iter()
        .find(|r| r.as_openssl().to_ascii_lowercase() == wanted)
        .ok_or_else(|| format!("unknown revocation reason: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{op}: could not start engine: {source}")]
    Spawn {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{op}: engine exited with status {code:?}: {stderr}")]
    Exit {
        op: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{op}: {reason}")]
    Native { op: &'static str, reason: String },
}

impl EngineError {
    /// Engine operation that failed.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Spawn { op, .. } | Self::Exit { op, .. } | Self::Native { op, .. } => op,
        }
    }

    pub(crate) fn native(op: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Native {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Certificate authority operations for one organization.
pub trait CaEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Produce a private key at `job.key_path` and a signing request at
    /// `job.request_path`, using the request extensions of `job.kind`.
    fn create_signing_request(&self, job: &SigningJob<'_>) -> Result<(), EngineError>;

    /// Turn the request into `job.cert_path`. CA requests are self-signed.
    fn sign_certificate(&self, job: &SigningJob<'_>) -> Result<(), EngineError>;

    /// Mark `job.cert_path` revoked in the CA database.
    fn revoke_certificate(
        &self,
        job: &SigningJob<'_>,
        reason: RevocationReason,
    ) -> Result<RevokeOutcome, EngineError>;

    /// Write the org's current revocation list.
    fn generate_crl(&self, job: &CrlJob<'_>) -> Result<(), EngineError>;
}

/// [`CaEngine`] backed by the `openssl` command line tool.
#[derive(Debug, Clone)]
pub struct OpensslEngine {
    bin: PathBuf,
}

impl Default for OpensslEngine {
    fn default() -> Self {
        Self::new("openssl")
    }
}

impl OpensslEngine {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    /// Run the binary with stdout and stderr captured. Non-zero exit is
    /// returned as [`EngineError::Exit`] carrying the trimmed stderr.
    fn run(&self, op: &'static str, args: Vec<OsString>) -> Result<(), EngineError> {
        tracing::debug!(op, bin = %self.bin.display(), ?args, "Running CA engine");
        let output = Command::new(&self.bin)
            .args(&args)
            .output()
            .map_err(|source| EngineError::Spawn { op, source })?;

        if output.status.success() {
            return Ok(());
        }
        Err(EngineError::Exit {
            op,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn os_args<const N: usize>(parts: [&dyn AsRef<OsStr>; N]) -> Vec<OsString> {
    parts
        .iter()
        .map(|p| AsRef::<OsStr>::as_ref(*p).to_os_string())
        .collect()
}

impl CaEngine for OpensslEngine {
    fn name(&self) -> &'static str {
        "openssl"
    }

    fn create_signing_request(&self, job: &SigningJob<'_>) -> Result<(), EngineError> {
        let args = os_args([
            &"req",
            &"-new",
            &"-batch",
            &"-config",
            &job.config_path,
            &"-out",
            &job.request_path,
            &"-keyout",
            &job.key_path,
            &"-reqexts",
            &job.kind.req_ext_section(),
        ]);
        self.run("create_signing_request", args)
    }

    fn sign_certificate(&self, job: &SigningJob<'_>) -> Result<(), EngineError> {
        let mut args = os_args([&"ca", &"-batch"]);
        if job.kind.is_self_signed() {
            args.push("-selfsign".into());
        }
        args.extend(os_args([
            &"-config",
            &job.config_path,
            &"-in",
            &job.request_path,
            &"-out",
            &job.cert_path,
            &"-extensions",
            &job.kind.ext_section(),
        ]));
        self.run("sign_certificate", args)
    }

    fn revoke_certificate(
        &self,
        job: &SigningJob<'_>,
        reason: RevocationReason,
    ) -> Result<RevokeOutcome, EngineError> {
        let args = os_args([
            &"ca",
            &"-batch",
            &"-config",
            &job.config_path,
            &"-revoke",
            &job.cert_path,
            &"-crl_reason",
            &reason.as_openssl(),
        ]);
        match self.run("revoke_certificate", args) {
            Ok(()) => Ok(RevokeOutcome::Revoked),
            Err(EngineError::Exit { ref stderr, .. }) if stderr.contains(ALREADY_REVOKED_MARKER) => {
                tracing::debug!(
                    identity_id = job.identity_id,
                    "Certificate was already revoked"
                );
                Ok(RevokeOutcome::AlreadyRevoked)
            }
            Err(e) => Err(e),
        }
    }

    fn generate_crl(&self, job: &CrlJob<'_>) -> Result<(), EngineError> {
        let args = os_args([
            &"ca",
            &"-batch",
            &"-config",
            &job.config_path,
            &"-gencrl",
            &"-out",
            &job.crl_path,
        ]);
        self.run("generate_crl", args)
    }
}
