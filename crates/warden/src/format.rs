//! CLI output formatting: tab-separated lines, indented detail blocks,
//! and the JSON views of identities (which omit the OTP secret).

use std::path::Path;

use warden_pki::cleanup::CleanupReport;
use warden_pki::org::OrgManifest;
use warden_pki::{CertState, Identity, PkiSettings, ServerProfile};

fn state_label(state: CertState) -> &'static str {
    match state {
        CertState::Uninitialized => "uninitialized",
        CertState::Requested => "requested",
        CertState::Signed => "signed",
        CertState::Revoked => "revoked",
    }
}

/// Format: `ID\tKIND\tSTATE\tNAME`
pub fn identity_line(identity: &Identity, state: CertState) {
    println!(
        "{}\t{}\t{}\t{}",
        identity.id,
        identity.kind,
        state_label(state),
        identity.name
    );
}

pub fn identity_detail(identity: &Identity, state: CertState) {
    println!("{}", identity.name);
    println!("  ID:           {}", identity.id);
    println!("  Kind:         {}", identity.kind);
    println!("  Organization: {} ({})", identity.org_name, identity.org_id);
    println!("  Certificate:  {}", state_label(state));
    if let Some(at) = identity.revoked_at {
        println!("  Revoked at:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

/// JSON view of an identity. The OTP secret is omitted; `otp uri` and
/// `otp regen` are the only commands that print it.
pub fn identity_json(identity: &Identity, state: CertState) -> serde_json::Value {
    serde_json::json!({
        "id": identity.id,
        "organization": identity.org_id,
        "organization_name": identity.org_name,
        "name": identity.name,
        "type": identity.kind,
        "state": state,
        "revoked_at": identity.revoked_at,
    })
}

pub fn cleanup_detail(report: &CleanupReport) {
    if report.is_clean() {
        return;
    }
    println!("  Some files could not be removed:");
    for (path, err) in &report.failed {
        println!("    {}: {err}", path.display());
    }
}

pub fn cleanup_json(identity_id: &str, report: &CleanupReport) -> serde_json::Value {
    let failed: Vec<_> = report
        .failed
        .iter()
        .map(|(path, err)| serde_json::json!({ "path": path, "error": err.to_string() }))
        .collect();
    serde_json::json!({
        "removed": identity_id,
        "files_removed": report.removed,
        "files_missing": report.missing,
        "files_failed": failed,
    })
}

/// Format: `ID\tNAME\tPROTO ADDRESS:PORT[\totp]`
pub fn server_line(server: &ServerProfile) {
    let otp = if server.otp_auth { "\totp" } else { "" };
    println!(
        "  {}\t{}\t{} {}:{}{otp}",
        server.id, server.name, server.protocol, server.public_address, server.port
    );
}

pub fn org_detail(
    manifest: &OrgManifest,
    root: &Path,
    ca_state: Option<CertState>,
    ca_fingerprint: Option<&str>,
    identities: usize,
) {
    println!("{}", manifest.name);
    println!("  ID:         {}", manifest.id);
    println!("  Root:       {}", root.display());
    println!(
        "  CA:         {}",
        ca_state.map_or("missing", state_label)
    );
    if let Some(fp) = ca_fingerprint {
        println!("  CA SHA-256: {fp}");
    }
    println!("  Identities: {identities}");
    if manifest.servers.is_empty() {
        println!("  Servers:    none");
    } else {
        println!("  Servers:");
        for server in &manifest.servers {
            server_line(server);
        }
    }
}

pub fn settings_detail(settings: &PkiSettings, path: &Path) {
    println!("Settings ({})", path.display());
    println!("  Key bits:     {}", settings.key_bits);
    println!("  Inline certs: {}", settings.inline_certs);
    println!("  Engine:       {:?}", settings.engine);
    println!("  OpenSSL:      {}", settings.openssl_bin.display());
}
