//! Identity certificate lifecycle.
//!
//! ```text
//! Uninitialized --create--> Requested --sign--> Signed --revoke--> Revoked
//!                                                  \                  |
//!                                                   `----remove-------'--> (gone)
//! ```
//!
//! Every CA engine call for an identity runs under that identity's lock.
//! Requesting and signing happen inside one critical section so a
//! concurrent revoke can never observe a request without its certificate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use warden_common::cache::KvStore;
use warden_common::{id, persist};
use warden_crypto::otp;

use crate::bundle;
use crate::cleanup::{self, CleanupReport};
use crate::engine::{CaEngine, EngineError, RevocationReason, RevokeOutcome, SigningJob};
use crate::error::PkiError;
use crate::events::{EventSink, LifecycleEvent};
use crate::identity::{org_users_cache_key, user_cache_key, Identity, StoredRecord, CA_IDENTITY_ID};
use crate::kind::IdentityKind;
use crate::layout::{self, IdentityPaths};
use crate::locks::IdentityLockTable;
use crate::migrate;
use crate::org::Organization;
use crate::profile::ClientProfile;
use crate::settings::PkiSettings;
use crate::sslconf;

const MAX_NAME_LEN: usize = 128;

/// Certificate state of one identity, derived from what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertState {
    Uninitialized,
    Requested,
    Signed,
    Revoked,
}

pub struct IdentityManager {
    engine: Arc<dyn CaEngine>,
    cache: Arc<dyn KvStore>,
    events: Arc<dyn EventSink>,
    locks: Arc<IdentityLockTable>,
    settings: PkiSettings,
}

impl IdentityManager {
    pub fn new(
        engine: Arc<dyn CaEngine>,
        cache: Arc<dyn KvStore>,
        events: Arc<dyn EventSink>,
        settings: PkiSettings,
    ) -> Self {
        Self {
            engine,
            cache,
            events,
            locks: IdentityLockTable::global(),
            settings,
        }
    }

    /// Use `locks` instead of the process-wide table.
    pub fn with_lock_table(mut self, locks: Arc<IdentityLockTable>) -> Self {
        self.locks = locks;
        self
    }

    pub fn settings(&self) -> &PkiSettings {
        &self.settings
    }

    /// Create an identity and issue its certificate. CA identities take
    /// the reserved id and may exist only once per organization.
    pub fn create(
        &self,
        org: &dyn Organization,
        kind: IdentityKind,
        name: &str,
    ) -> Result<Identity, PkiError> {
        validate_name(name)?;
        let id = match kind {
            IdentityKind::Ca => CA_IDENTITY_ID.to_string(),
            _ => id::generate_identity_id(),
        };

        let mut identity = Identity {
            id,
            org_id: org.id().to_string(),
            org_name: org.name().to_string(),
            name: name.trim().to_string(),
            kind,
            otp_secret: String::new(),
            revoked_at: None,
        };
        self.initialize(org, &mut identity)?;
        Ok(identity)
    }

    fn initialize(&self, org: &dyn Organization, identity: &mut Identity) -> Result<(), PkiError> {
        if kind_needs_ca(identity.kind) {
            let ca_cert = IdentityPaths::new(org.root(), CA_IDENTITY_ID).cert;
            if !ca_cert.is_file() {
                return Err(PkiError::CaNotInitialized(org.id().to_string()));
            }
        }

        let paths = IdentityPaths::new(org.root(), &identity.id);
        layout::ensure_org_layout(org.root())?;

        let job = SigningJob::new(org.id(), org.root(), &identity.id, identity.kind, &paths);
        self.locks.with_lock(&identity.id, || -> Result<(), PkiError> {
            // The CA id is fixed, so its uniqueness is only decided here.
            if identity.kind == IdentityKind::Ca && paths.cert.exists() {
                return Err(PkiError::AlreadyExists(format!(
                    "CA of organization {}",
                    org.id()
                )));
            }
            sslconf::write(
                &paths.ssl_conf,
                org.id(),
                org.root(),
                self.settings.key_bits,
                &identity.id,
            )?;
            self.engine
                .create_signing_request(&job)
                .map_err(|e| engine_failure(org, &identity.id, e))?;
            restrict_to_owner(&paths.key)?;
            self.engine
                .sign_certificate(&job)
                .map_err(|e| engine_failure(org, &identity.id, e))
        })?;

        identity.otp_secret = otp::generate_secret();
        self.commit(org, identity)?;
        if let Err(e) = sslconf::remove(&paths.ssl_conf) {
            tracing::warn!(identity_id = %identity.id, error = %e, "Failed to remove signing config");
        }

        if identity.kind == IdentityKind::Client {
            self.events.audit(
                "user_created",
                org.id(),
                &format!("Created new user \"{}\".", identity.name),
            );
        }
        self.events.emit(LifecycleEvent::UsersUpdated {
            org_id: org.id().to_string(),
        });
        self.events.emit(LifecycleEvent::ServersUpdated);

        tracing::info!(
            org_id = org.id(),
            identity_id = %identity.id,
            kind = %identity.kind,
            engine = self.engine.name(),
            "Identity created"
        );
        Ok(())
    }

    /// Persist `identity` and mirror it into the shared cache.
    pub fn commit(&self, org: &dyn Organization, identity: &Identity) -> Result<(), PkiError> {
        let paths = IdentityPaths::new(org.root(), &identity.id);
        persist::write_json_private(&paths.record, identity)?;
        self.mirror(org, identity)
    }

    fn mirror(&self, org: &dyn Organization, identity: &Identity) -> Result<(), PkiError> {
        let json = serde_json::to_string(identity).map_err(|e| PkiError::Internal(e.to_string()))?;
        self.cache.set(&user_cache_key(&identity.id), &json)?;
        self.cache
            .set_add(&org_users_cache_key(org.id()), &identity.id)?;
        Ok(())
    }

    /// Read an identity back from disk, upgrading records that predate
    /// identity kinds.
    pub fn load(&self, org: &dyn Organization, identity_id: &str) -> Result<Identity, PkiError> {
        if !id::is_valid_identity_id(identity_id) {
            return Err(PkiError::InvalidId(identity_id.to_string()));
        }
        let paths = IdentityPaths::new(org.root(), identity_id);
        let record: StoredRecord = persist::read_json_if_exists(&paths.record)?
            .ok_or_else(|| PkiError::NotFound(format!("identity {identity_id}")))?;

        match record.kind {
            Some(kind) => {
                let identity = record.into_identity(kind);
                self.mirror(org, &identity)?;
                Ok(identity)
            }
            None => {
                let kind = migrate::detect_kind_at(&paths.cert)?;
                tracing::debug!(
                    org_id = org.id(),
                    identity_id,
                    kind = %kind,
                    "Upgrading identity record without kind"
                );
                let identity = record.into_identity(kind);
                self.commit(org, &identity)?;
                Ok(identity)
            }
        }
    }

    /// Every readable identity of `org`, sorted by name.
    pub fn list(&self, org: &dyn Organization) -> Result<Vec<Identity>, PkiError> {
        let dir = layout::users_dir(org.root());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut identities = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("conf") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(org, id) {
                Ok(identity) => identities.push(identity),
                Err(e) => {
                    tracing::warn!(org_id = org.id(), identity_id = id, error = %e, "Skipping unreadable identity")
                }
            }
        }
        identities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(identities)
    }

    pub fn rename(
        &self,
        org: &dyn Organization,
        identity: &mut Identity,
        name: &str,
    ) -> Result<(), PkiError> {
        validate_name(name)?;
        identity.name = name.trim().to_string();
        self.commit(org, identity)?;
        self.events.emit(LifecycleEvent::UsersUpdated {
            org_id: org.id().to_string(),
        });
        Ok(())
    }

    /// Replace the OTP secret. Codes of the old secret stop verifying at once.
    pub fn regenerate_otp_secret(
        &self,
        org: &dyn Organization,
        identity: &mut Identity,
    ) -> Result<(), PkiError> {
        let stale_key = otp::replay_key(&identity.id, &identity.otp_secret);
        identity.otp_secret = otp::generate_secret();
        self.commit(org, identity)?;

        if let Err(e) = self.cache.remove(&stale_key) {
            tracing::debug!(identity_id = %identity.id, error = %e, "Failed to drop stale passcode record");
        }
        self.events.emit(LifecycleEvent::UsersUpdated {
            org_id: org.id().to_string(),
        });
        Ok(())
    }

    /// Check a passcode, consuming it on success.
    pub fn verify_otp_code(&self, identity: &Identity, code: &str) -> Result<bool, PkiError> {
        let replay_key = otp::replay_key(&identity.id, &identity.otp_secret);
        Ok(otp::verify_code(
            self.cache.as_ref(),
            &replay_key,
            &identity.otp_secret,
            code,
        )?)
    }

    /// [`Self::verify_otp_code`] as of `now` (UNIX seconds).
    pub fn verify_otp_code_at(
        &self,
        identity: &Identity,
        code: &str,
        now: u64,
    ) -> Result<bool, PkiError> {
        let replay_key = otp::replay_key(&identity.id, &identity.otp_secret);
        Ok(otp::verify_code_at(
            self.cache.as_ref(),
            &replay_key,
            &identity.otp_secret,
            code,
            now,
        )?)
    }

    /// Revoke the identity's certificate and refresh the org CRL.
    pub fn revoke(
        &self,
        org: &dyn Organization,
        identity: &mut Identity,
        reason: RevocationReason,
    ) -> Result<(), PkiError> {
        if self.revoke_certificate(org, identity, reason)? {
            identity.revoked_at = Some(Utc::now());
            self.commit(org, identity)?;
            self.events.emit(LifecycleEvent::UsersUpdated {
                org_id: org.id().to_string(),
            });
        }
        Ok(())
    }

    /// Returns whether a certificate was present to revoke.
    fn revoke_certificate(
        &self,
        org: &dyn Organization,
        identity: &Identity,
        reason: RevocationReason,
    ) -> Result<bool, PkiError> {
        if identity.is_ca() {
            return Err(PkiError::CaNotRevocable);
        }

        let paths = IdentityPaths::new(org.root(), &identity.id);
        if !paths.cert.is_file() {
            tracing::warn!(
                org_id = org.id(),
                identity_id = %identity.id,
                "Skipping revoke of identity without certificate"
            );
            return Ok(false);
        }

        let job = SigningJob::new(org.id(), org.root(), &identity.id, identity.kind, &paths);
        let outcome = self.locks.with_lock(&identity.id, || -> Result<_, PkiError> {
            sslconf::write(
                &paths.ssl_conf,
                org.id(),
                org.root(),
                self.settings.key_bits,
                &identity.id,
            )?;
            let result = self.engine.revoke_certificate(&job, reason);
            if let Err(e) = sslconf::remove(&paths.ssl_conf) {
                tracing::debug!(identity_id = %identity.id, error = %e, "Failed to remove signing config");
            }
            result.map_err(|e| engine_failure(org, &identity.id, e))
        })?;

        if outcome == RevokeOutcome::AlreadyRevoked {
            tracing::debug!(identity_id = %identity.id, "Certificate was already revoked");
        }
        org.generate_crl()?;

        tracing::info!(
            org_id = org.id(),
            identity_id = %identity.id,
            reason = reason.as_openssl(),
            "Certificate revoked"
        );
        Ok(true)
    }

    /// Revoke and delete the identity. File cleanup is best effort: the
    /// report lists what could not be removed.
    pub fn remove(
        &self,
        org: &dyn Organization,
        identity: Identity,
        reason: RevocationReason,
    ) -> Result<CleanupReport, PkiError> {
        let report = self.discard(org, &identity, reason)?;

        self.events.emit(LifecycleEvent::UsersUpdated {
            org_id: org.id().to_string(),
        });
        self.events.emit(LifecycleEvent::ServersUpdated);
        if identity.kind == IdentityKind::Client {
            self.events.audit(
                "user_deleted",
                org.id(),
                &format!("Deleted user \"{}\".", identity.name),
            );
        }

        tracing::info!(
            org_id = org.id(),
            identity_id = %identity.id,
            leftover = report.failed.len(),
            "Identity removed"
        );
        Ok(report)
    }

    /// Remove an identity known only by id.
    ///
    /// A recorded identity goes through [`Self::remove`]. Without a record
    /// (a `create` whose engine step failed) the files and any certificate
    /// are unwound quietly: the identity was never announced, so no event
    /// or audit entry is written.
    pub fn remove_by_id(
        &self,
        org: &dyn Organization,
        identity_id: &str,
        kind: IdentityKind,
        reason: RevocationReason,
    ) -> Result<CleanupReport, PkiError> {
        match self.load(org, identity_id) {
            Ok(identity) => return self.remove(org, identity, reason),
            Err(PkiError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let identity = Identity {
            id: identity_id.to_string(),
            org_id: org.id().to_string(),
            org_name: org.name().to_string(),
            name: String::new(),
            kind,
            otp_secret: String::new(),
            revoked_at: None,
        };
        let report = self.discard(org, &identity, reason)?;
        tracing::info!(
            org_id = org.id(),
            identity_id,
            leftover = report.failed.len(),
            "Unrecorded identity removed"
        );
        Ok(report)
    }

    /// Drop the cache entries, revoke any certificate, delete the files.
    fn discard(
        &self,
        org: &dyn Organization,
        identity: &Identity,
        reason: RevocationReason,
    ) -> Result<CleanupReport, PkiError> {
        self.clear_cache(org, identity)?;
        self.revoke_certificate(org, identity, reason)?;

        let paths = IdentityPaths::new(org.root(), &identity.id);
        let report = cleanup::remove_files(&identity.id, paths.owned_files());
        let replay_key = otp::replay_key(&identity.id, &identity.otp_secret);
        if let Err(e) = self.cache.remove(&replay_key) {
            tracing::debug!(identity_id = %identity.id, error = %e, "Failed to drop passcode record");
        }
        Ok(report)
    }

    fn clear_cache(&self, org: &dyn Organization, identity: &Identity) -> Result<(), PkiError> {
        self.cache
            .set_remove(&org_users_cache_key(org.id()), &identity.id)?;
        self.cache.remove(&user_cache_key(&identity.id))?;
        Ok(())
    }

    pub fn cert_state(&self, org: &dyn Organization, identity: &Identity) -> CertState {
        let paths = IdentityPaths::new(org.root(), &identity.id);
        if identity.is_revoked() {
            CertState::Revoked
        } else if paths.cert.is_file() {
            CertState::Signed
        } else if paths.request.is_file() {
            CertState::Requested
        } else {
            CertState::Uninitialized
        }
    }

    /// Bundle in the mode chosen by [`PkiSettings::inline_certs`].
    pub fn build_key_archive(
        &self,
        org: &dyn Organization,
        identity: &Identity,
    ) -> Result<PathBuf, PkiError> {
        bundle::build_key_archive(org, identity, self.settings.inline_certs)
    }

    pub fn build_single_profile(
        &self,
        org: &dyn Organization,
        identity: &Identity,
        server_id: &str,
    ) -> Result<ClientProfile, PkiError> {
        bundle::build_single_profile(org, identity, server_id)
    }
}

fn kind_needs_ca(kind: IdentityKind) -> bool {
    !kind.is_self_signed()
}

fn engine_failure(org: &dyn Organization, identity_id: &str, source: EngineError) -> PkiError {
    let op = source.op();
    tracing::error!(
        org_id = org.id(),
        identity_id,
        op,
        error = %source,
        "CA engine call failed"
    );
    PkiError::Engine {
        op,
        org_id: org.id().to_string(),
        identity_id: identity_id.to_string(),
        source,
    }
}

fn restrict_to_owner(path: &Path) -> Result<(), PkiError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn validate_name(name: &str) -> Result<(), PkiError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PkiError::InvalidName("name is empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(PkiError::InvalidName(format!(
            "name is longer than {MAX_NAME_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(PkiError::InvalidName(
            "name contains control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_validated() {
        assert!(validate_name("alice").is_ok());
        assert!(validate_name("  Alice Smith ").is_ok());
        assert!(matches!(validate_name("   "), Err(PkiError::InvalidName(_))));
        assert!(matches!(validate_name("a\nb"), Err(PkiError::InvalidName(_))));
        assert!(matches!(
            validate_name(&"x".repeat(MAX_NAME_LEN + 1)),
            Err(PkiError::InvalidName(_))
        ));
    }

    #[test]
    fn only_non_ca_kinds_need_a_ca() {
        assert!(!kind_needs_ca(IdentityKind::Ca));
        assert!(kind_needs_ca(IdentityKind::Server));
        assert!(kind_needs_ca(IdentityKind::Client));
    }
}
