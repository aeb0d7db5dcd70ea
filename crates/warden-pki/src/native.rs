//! In-process CA engine built on `rcgen`.
//!
//! Keys are ECDSA P-256. The org CA lives at `keys/ca.key` and
//! `certs/ca.crt` like the openssl engine's, but revocations are kept
//! in `revoked.json` instead of the openssl index database.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams,
    CertificateSigningRequestParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyIdMethod, KeyPair,
    KeyUsagePurpose, RevokedCertParams, SerialNumber,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use warden_common::encoding::{hex_decode, hex_encode, pem_block};
use warden_common::persist;

use crate::engine::{CaEngine, CrlJob, EngineError, RevocationReason, RevokeOutcome, SigningJob};
use crate::identity::CA_IDENTITY_ID;
use crate::kind::IdentityKind;
use crate::layout::{IdentityPaths, REVOKED_FILENAME};

const CERT_VALIDITY_DAYS: i64 = 3650;
const CRL_VALIDITY_DAYS: i64 = 365;
const SERIAL_LEN: usize = 16;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RevocationDb {
    crl_number: u64,
    revoked: Vec<RevokedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RevokedEntry {
    serial: String,
    identity_id: String,
    revoked_at: i64,
    reason: RevocationReason,
}

/// [`CaEngine`] that signs with `rcgen` instead of spawning openssl.
#[derive(Default)]
pub struct RcgenEngine {
    /// Serializes read-modify-write of `revoked.json` across identities.
    db_lock: Mutex<()>,
}

impl RcgenEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the org CA as an rcgen issuer.
    fn load_issuer(
        &self,
        op: &'static str,
        org_root: &Path,
    ) -> Result<(Certificate, KeyPair), EngineError> {
        let paths = IdentityPaths::new(org_root, CA_IDENTITY_ID);
        let key_pem = read(op, &paths.key)?;
        let cert_text = read(op, &paths.cert)?;
        let cert_pem = pem_block(&cert_text, "CERTIFICATE")
            .ok_or_else(|| EngineError::native(op, "CA certificate holds no PEM block"))?;

        let key = KeyPair::from_pem(&key_pem).map_err(|e| EngineError::native(op, e))?;
        let params =
            CertificateParams::from_ca_cert_pem(cert_pem).map_err(|e| EngineError::native(op, e))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| EngineError::native(op, e))?;
        Ok((cert, key))
    }

    fn db_path(org_root: &Path) -> PathBuf {
        org_root.join(REVOKED_FILENAME)
    }

    fn load_db(op: &'static str, org_root: &Path) -> Result<RevocationDb, EngineError> {
        persist::read_json_or_default(&Self::db_path(org_root))
            .map_err(|e| EngineError::native(op, e))
    }

    fn save_db(op: &'static str, org_root: &Path, db: &RevocationDb) -> Result<(), EngineError> {
        persist::write_json_pretty(&Self::db_path(org_root), db)
            .map_err(|e| EngineError::native(op, e))
    }
}

fn read(op: &'static str, path: &Path) -> Result<String, EngineError> {
    std::fs::read_to_string(path)
        .map_err(|e| EngineError::native(op, format!("{}: {e}", path.display())))
}

fn write(op: &'static str, path: &Path, contents: &str) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::native(op, e))?;
    }
    std::fs::write(path, contents)
        .map_err(|e| EngineError::native(op, format!("{}: {e}", path.display())))
}

/// Positive, fixed-width random serial.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; SERIAL_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7f) | 0x40;
    SerialNumber::from_slice(&bytes)
}

/// Extensions and validity for one identity kind. Mirrors the
/// `*_ext` sections of the openssl signing config.
fn apply_profile(params: &mut CertificateParams, kind: IdentityKind) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);
    params.serial_number = Some(random_serial());
    params.use_authority_key_identifier_extension = !kind.is_self_signed();

    match kind {
        IdentityKind::Ca => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
            params.extended_key_usages = Vec::new();
        }
        IdentityKind::Server => {
            params.is_ca = IsCa::ExplicitNoCa;
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        }
        IdentityKind::Client => {
            params.is_ca = IsCa::ExplicitNoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        }
    }
}

fn to_rcgen_reason(reason: RevocationReason) -> rcgen::RevocationReason {
    match reason {
        RevocationReason::Unspecified => rcgen::RevocationReason::Unspecified,
        RevocationReason::KeyCompromise => rcgen::RevocationReason::KeyCompromise,
        RevocationReason::CaCompromise => rcgen::RevocationReason::CaCompromise,
        RevocationReason::AffiliationChanged => rcgen::RevocationReason::AffiliationChanged,
        RevocationReason::Superseded => rcgen::RevocationReason::Superseded,
        RevocationReason::CessationOfOperation => rcgen::RevocationReason::CessationOfOperation,
    }
}

/// Hex serial of the certificate stored at `path`.
pub fn certificate_serial(path: &Path) -> Result<String, EngineError> {
    const OP: &str = "certificate_serial";
    let text = read(OP, path)?;
    let block = pem_block(&text, "CERTIFICATE")
        .ok_or_else(|| EngineError::native(OP, "no PEM certificate block"))?;
    let armored = format!("{block}\n");
    let (_, pem) = x509_parser::pem::parse_x509_pem(armored.as_bytes())
        .map_err(|e| EngineError::native(OP, e))?;
    let cert = pem.parse_x509().map_err(|e| EngineError::native(OP, e))?;
    Ok(hex_encode(cert.raw_serial()))
}

impl CaEngine for RcgenEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn create_signing_request(&self, job: &SigningJob<'_>) -> Result<(), EngineError> {
        const OP: &str = "create_signing_request";
        let key = KeyPair::generate().map_err(|e| EngineError::native(OP, e))?;

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::OrganizationName, job.org_id);
        params
            .distinguished_name
            .push(DnType::CommonName, job.identity_id);

        let csr = params
            .serialize_request(&key)
            .map_err(|e| EngineError::native(OP, e))?;
        let csr_pem = pem::encode(&pem::Pem::new("CERTIFICATE REQUEST", csr.der().to_vec()));

        write(OP, job.key_path, &key.serialize_pem())?;
        write(OP, job.request_path, &csr_pem)?;
        Ok(())
    }

    fn sign_certificate(&self, job: &SigningJob<'_>) -> Result<(), EngineError> {
        const OP: &str = "sign_certificate";
        let csr_pem = read(OP, job.request_path)?;
        let mut csr = CertificateSigningRequestParams::from_pem(&csr_pem)
            .map_err(|e| EngineError::native(OP, e))?;
        apply_profile(&mut csr.params, job.kind);

        let cert = if job.kind.is_self_signed() {
            let key = KeyPair::from_pem(&read(OP, job.key_path)?)
                .map_err(|e| EngineError::native(OP, e))?;
            csr.params
                .self_signed(&key)
                .map_err(|e| EngineError::native(OP, e))?
        } else {
            let (issuer, issuer_key) = self.load_issuer(OP, job.org_root)?;
            csr.signed_by(&issuer, &issuer_key)
                .map_err(|e| EngineError::native(OP, e))?
        };

        write(OP, job.cert_path, &cert.pem())
    }

    fn revoke_certificate(
        &self,
        job: &SigningJob<'_>,
        reason: RevocationReason,
    ) -> Result<RevokeOutcome, EngineError> {
        const OP: &str = "revoke_certificate";
        let serial = certificate_serial(job.cert_path)?;

        let _guard = self.db_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut db = Self::load_db(OP, job.org_root)?;
        if db.revoked.iter().any(|e| e.serial == serial) {
            return Ok(RevokeOutcome::AlreadyRevoked);
        }

        db.revoked.push(RevokedEntry {
            serial,
            identity_id: job.identity_id.to_string(),
            revoked_at: OffsetDateTime::now_utc().unix_timestamp(),
            reason,
        });
        Self::save_db(OP, job.org_root, &db)?;
        Ok(RevokeOutcome::Revoked)
    }

    fn generate_crl(&self, job: &CrlJob<'_>) -> Result<(), EngineError> {
        const OP: &str = "generate_crl";
        let (issuer, issuer_key) = self.load_issuer(OP, job.org_root)?;

        let _guard = self.db_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut db = Self::load_db(OP, job.org_root)?;
        db.crl_number += 1;

        let mut revoked_certs = Vec::with_capacity(db.revoked.len());
        for entry in &db.revoked {
            let serial = hex_decode(&entry.serial).map_err(|e| EngineError::native(OP, e))?;
            revoked_certs.push(RevokedCertParams {
                serial_number: SerialNumber::from_slice(&serial),
                revocation_time: OffsetDateTime::from_unix_timestamp(entry.revoked_at)
                    .unwrap_or(OffsetDateTime::now_utc()),
                reason_code: Some(to_rcgen_reason(entry.reason)),
                invalidity_date: None,
            });
        }

        let now = OffsetDateTime::now_utc();
        let params = CertificateRevocationListParams {
            this_update: now,
            next_update: now + Duration::days(CRL_VALIDITY_DAYS),
            crl_number: SerialNumber::from(db.crl_number),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        };
        let crl = params
            .signed_by(&issuer, &issuer_key)
            .map_err(|e| EngineError::native(OP, e))?;

        write(
            OP,
            job.crl_path,
            &pem::encode(&pem::Pem::new("X509 CRL", crl.der().to_vec())),
        )?;
        Self::save_db(OP, job.org_root, &db)?;
        tracing::debug!(
            crl_number = db.crl_number,
            revoked = db.revoked.len(),
            "Revocation list written"
        );
        Ok(())
    }
}
