//! One-time upgrade of identity records written without a kind.
//!
//! The kind is recovered from the issued certificate. Certificates
//! written by `openssl ca` carry a text dump, which is checked first;
//! bare PEM certificates are parsed instead.

use std::path::Path;

use warden_common::encoding::pem_block;

use crate::error::PkiError;
use crate::kind::IdentityKind;

const CA_MARKER: &str = "CA:TRUE";
const SERVER_MARKER: &str = "TLS Web Server Authentication";

/// Infer the kind of the certificate stored as `cert_text`.
pub fn detect_kind(cert_text: &str) -> Result<IdentityKind, PkiError> {
    if cert_text.contains(CA_MARKER) {
        return Ok(IdentityKind::Ca);
    }
    if cert_text.contains(SERVER_MARKER) {
        return Ok(IdentityKind::Server);
    }
    // openssl dumps always spell out the markers; no dump means PEM only.
    if cert_text.contains("Certificate:") {
        return Ok(IdentityKind::Client);
    }
    detect_kind_from_der(cert_text)
}

fn detect_kind_from_der(cert_text: &str) -> Result<IdentityKind, PkiError> {
    let block = pem_block(cert_text, "CERTIFICATE")
        .ok_or_else(|| PkiError::Parse("certificate holds no PEM block".to_string()))?;
    let armored = format!("{block}\n");
    let (_, pem) = x509_parser::pem::parse_x509_pem(armored.as_bytes())
        .map_err(|e| PkiError::Parse(e.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| PkiError::Parse(e.to_string()))?;

    let is_ca = cert
        .basic_constraints()
        .map_err(|e| PkiError::Parse(e.to_string()))?
        .is_some_and(|bc| bc.value.ca);
    if is_ca {
        return Ok(IdentityKind::Ca);
    }

    let server_auth = cert
        .extended_key_usage()
        .map_err(|e| PkiError::Parse(e.to_string()))?
        .is_some_and(|eku| eku.value.server_auth);
    Ok(if server_auth {
        IdentityKind::Server
    } else {
        IdentityKind::Client
    })
}

/// Kind of the identity whose certificate lives at `cert_path`.
pub fn detect_kind_at(cert_path: &Path) -> Result<IdentityKind, PkiError> {
    let text = std::fs::read_to_string(cert_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PkiError::NotFound(format!("certificate {}", cert_path.display()))
        } else {
            PkiError::Io(e)
        }
    })?;
    detect_kind(&text)
}
