//! Organization and server management.

use warden_common::paths;
use warden_pki::audit;
use warden_pki::org::OrgManifest;
use warden_pki::{FileOrganization, IdentityKind, Organization, ServerProfile, CA_IDENTITY_ID};

use super::{org_root, print_json, Context};
use crate::cli::{Cli, OrgSubcommand};
use crate::format;

pub fn dispatch(cli: &Cli, command: &OrgSubcommand) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    match command {
        OrgSubcommand::Init { id, name } => init(&ctx, id, name.as_deref().unwrap_or(id)),
        OrgSubcommand::List => list(&ctx),
        OrgSubcommand::Show => show(&ctx, &ctx.selected_org(cli)?),
        OrgSubcommand::Crl => crl(&ctx, &ctx.selected_org(cli)?),
        OrgSubcommand::AddServer {
            id,
            name,
            address,
            port,
            protocol,
            otp,
        } => {
            let mut org = ctx.selected_org(cli)?;
            let server = ServerProfile {
                id: id.clone(),
                name: name.clone(),
                protocol: protocol.clone(),
                public_address: address.clone(),
                port: *port,
                otp_auth: *otp,
            };
            org.upsert_server(server.clone())?;
            if ctx.json {
                print_json(&server);
            } else {
                println!("Server {} saved.", server.id);
                format::server_line(&server);
            }
            Ok(())
        }
        OrgSubcommand::RemoveServer { id } => {
            let mut org = ctx.selected_org(cli)?;
            org.remove_server(id)?;
            if ctx.json {
                print_json(&serde_json::json!({ "removed": id }));
            } else {
                println!("Server {id} removed.");
            }
            Ok(())
        }
    }
}

/// Lay out the organization and issue its CA.
fn init(ctx: &Context, org_id: &str, name: &str) -> anyhow::Result<()> {
    let root = org_root(org_id)?;
    let org = FileOrganization::create(
        root.clone(),
        org_id,
        name,
        std::sync::Arc::clone(&ctx.engine),
        ctx.settings.key_bits,
    )?;

    let ca = match ctx.manager.create(&org, IdentityKind::Ca, name) {
        Ok(ca) => ca,
        Err(e) => {
            // Without a CA the org is unusable; let the operator retry from scratch.
            if let Err(rm) = std::fs::remove_dir_all(&root) {
                tracing::warn!(org_id, error = %rm, "Failed to remove half-created organization");
            }
            return Err(e.into());
        }
    };

    if ctx.json {
        print_json(&serde_json::json!({
            "created": true,
            "organization": org_id,
            "name": name,
            "ca": ca.id,
        }));
    } else {
        println!("Organization {org_id} created.");
        println!("  Name: {name}");
        println!("  Root: {}", root.display());
    }
    Ok(())
}

fn list(ctx: &Context) -> anyhow::Result<()> {
    let dir = paths::warden_orgs_dir();
    let mut manifests: Vec<OrgManifest> = Vec::new();
    if dir.is_dir() {
        for entry in std::fs::read_dir(&dir)? {
            let root = entry?.path();
            if !root.is_dir() {
                continue;
            }
            match FileOrganization::open(
                root.clone(),
                std::sync::Arc::clone(&ctx.engine),
                ctx.settings.key_bits,
            ) {
                Ok(org) => manifests.push(org.manifest().clone()),
                Err(e) => {
                    tracing::warn!(path = %root.display(), error = %e, "Skipping unreadable organization")
                }
            }
        }
    }
    manifests.sort_by(|a, b| a.id.cmp(&b.id));

    if ctx.json {
        print_json(&manifests);
    } else if manifests.is_empty() {
        println!("No organizations. Create one with: warden org init <ID>");
    } else {
        for manifest in &manifests {
            println!(
                "{}\t{}\t{} server(s)",
                manifest.id,
                manifest.name,
                manifest.servers.len()
            );
        }
    }
    Ok(())
}

fn show(ctx: &Context, org: &FileOrganization) -> anyhow::Result<()> {
    let identities = ctx.manager.list(org)?;
    let ca = identities.iter().find(|i| i.id == CA_IDENTITY_ID);
    let ca_state = ca.map(|ca| ctx.manager.cert_state(org, ca));
    let ca_fingerprint = match org.ca_fingerprint() {
        Ok(fp) => Some(fp),
        Err(e) => {
            tracing::debug!(org_id = org.id(), error = %e, "No CA fingerprint");
            None
        }
    };

    if ctx.json {
        print_json(&serde_json::json!({
            "organization": org.manifest(),
            "root": org.root(),
            "ca_state": ca_state,
            "ca_fingerprint": ca_fingerprint,
            "identities": identities.len(),
        }));
    } else {
        format::org_detail(
            org.manifest(),
            org.root(),
            ca_state,
            ca_fingerprint.as_deref(),
            identities.len(),
        );
    }
    Ok(())
}

fn crl(ctx: &Context, org: &FileOrganization) -> anyhow::Result<()> {
    org.generate_crl()?;
    let path = org.root().join(warden_pki::layout::CRL_FILENAME);
    if ctx.json {
        print_json(&serde_json::json!({ "crl": path }));
    } else {
        println!("Revocation list written to {}", path.display());
    }
    Ok(())
}

/// Print the audit log, limited to `--org` when one is selected.
pub fn audit_log(cli: &Cli) -> anyhow::Result<()> {
    let log = audit::read_log_at(&audit::audit_log_path())?;
    let entries: Vec<&str> = match cli.org.as_deref() {
        Some(org_id) => audit::entries_for_org(&log, org_id),
        None => log.lines().collect(),
    };

    if cli.json {
        print_json(&entries);
    } else if entries.is_empty() {
        println!("Audit log is empty.");
    } else {
        for entry in entries {
            println!("{entry}");
        }
    }
    Ok(())
}
