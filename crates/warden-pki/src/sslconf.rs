//! Transient openssl configuration written before every engine call.
//!
//! The file names the org's CA database, the subject of the identity
//! being processed and one extension section per [`crate::kind::IdentityKind`]. It
//! lives at `temp/<id>.conf` only for the duration of an engine call.

use std::path::Path;

/// Render the signing config for one identity.
pub fn render(org_id: &str, org_root: &Path, key_bits: u32, identity_id: &str) -> String {
    let dir = org_root.display();
    format!(
        r#"[ default ]
org_id = {org_id}
dir = {dir}

[ ca ]
default_ca = org_ca

[ org_ca ]
database = $dir/indexed.txt
new_certs_dir = $dir/certs
certificate = $dir/certs/ca.crt
private_key = $dir/keys/ca.key
serial = $dir/serial
crl = $dir/ca.crl
default_days = 3650
default_crl_days = 365
default_md = sha256
policy = org_policy
email_in_dn = no
unique_subject = no
copy_extensions = none

[ org_policy ]
organizationName = supplied
commonName = supplied

[ req ]
default_bits = {key_bits}
encrypt_key = no
default_md = sha256
prompt = no
distinguished_name = req_dn

[ req_dn ]
organizationName = {org_id}
commonName = {identity_id}

[ ca_req_ext ]
basicConstraints = CA:true
keyUsage = cRLSign, keyCertSign

[ server_req_ext ]
basicConstraints = CA:false
keyUsage = digitalSignature, keyEncipherment
extendedKeyUsage = serverAuth

[ client_req_ext ]
basicConstraints = CA:false
keyUsage = digitalSignature
extendedKeyUsage = clientAuth

[ ca_ext ]
basicConstraints = critical, CA:true
keyUsage = critical, cRLSign, keyCertSign
subjectKeyIdentifier = hash
authorityKeyIdentifier = keyid:always, issuer

[ server_ext ]
basicConstraints = CA:false
keyUsage = digitalSignature, keyEncipherment
extendedKeyUsage = serverAuth
nsCertType = server
subjectKeyIdentifier = hash
authorityKeyIdentifier = keyid, issuer

[ client_ext ]
basicConstraints = CA:false
keyUsage = digitalSignature
extendedKeyUsage = clientAuth
subjectKeyIdentifier = hash
authorityKeyIdentifier = keyid, issuer
"#
    )
}

/// Write the rendered config to `path`, creating `temp/` if needed.
pub fn write(
    path: &Path,
    org_id: &str,
    org_root: &Path,
    key_bits: u32,
    identity_id: &str,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render(org_id, org_root, key_bits, identity_id))?;
    tracing::debug!(path = %path.display(), identity_id, "Signing config written");
    Ok(())
}

/// Delete the config. A missing file is not an error.
pub fn remove(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
