use warden_pki::engine::RevocationReason;
use warden_pki::{IdentityKind, PkiError};

use super::{print_json, Context};
use crate::cli::Cli;
use crate::format;

pub fn create(cli: &Cli, kind: IdentityKind, name: &str) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    let org = ctx.selected_org(cli)?;
    let identity = match ctx.manager.create(&org, kind, name) {
        Ok(identity) => identity,
        Err(e) => {
            // The CA is unwound by `org init`; any other identity is removed
            // here so a failed engine call leaves no half-issued files.
            if let PkiError::Engine { identity_id, .. } = &e {
                if kind != IdentityKind::Ca {
                    if let Err(rm) = ctx.manager.remove_by_id(
                        &org,
                        identity_id,
                        kind,
                        RevocationReason::Unspecified,
                    ) {
                        tracing::warn!(identity_id = %identity_id, error = %rm, "Failed to unwind identity");
                    }
                }
            }
            return Err(e.into());
        }
    };

    if ctx.json {
        print_json(&format::identity_json(&identity, ctx.manager.cert_state(&org, &identity)));
    } else {
        println!("Identity created.");
        format::identity_detail(&identity, ctx.manager.cert_state(&org, &identity));
    }
    Ok(())
}

pub fn show(cli: &Cli, id: &str) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    let org = ctx.selected_org(cli)?;
    let identity = ctx.load_identity(&org, id)?;
    let state = ctx.manager.cert_state(&org, &identity);

    if ctx.json {
        print_json(&format::identity_json(&identity, state));
    } else {
        format::identity_detail(&identity, state);
    }
    Ok(())
}

pub fn list(cli: &Cli) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    let org = ctx.selected_org(cli)?;
    let identities = ctx.manager.list(&org)?;

    if ctx.json {
        let rows: Vec<_> = identities
            .iter()
            .map(|i| format::identity_json(i, ctx.manager.cert_state(&org, i)))
            .collect();
        print_json(&rows);
    } else if identities.is_empty() {
        println!("No identities in {}.", org.manifest().id);
    } else {
        for identity in &identities {
            format::identity_line(identity, ctx.manager.cert_state(&org, identity));
        }
    }
    Ok(())
}

pub fn rename(cli: &Cli, id: &str, name: &str) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    let org = ctx.selected_org(cli)?;
    let mut identity = ctx.load_identity(&org, id)?;
    ctx.manager.rename(&org, &mut identity, name)?;

    if ctx.json {
        print_json(&format::identity_json(&identity, ctx.manager.cert_state(&org, &identity)));
    } else {
        println!("Identity {} renamed to \"{}\".", identity.id, identity.name);
    }
    Ok(())
}

pub fn revoke(cli: &Cli, id: &str, reason: RevocationReason) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    let org = ctx.selected_org(cli)?;
    let mut identity = ctx.load_identity(&org, id)?;
    ctx.manager.revoke(&org, &mut identity, reason)?;
    let state = ctx.manager.cert_state(&org, &identity);

    if ctx.json {
        print_json(&format::identity_json(&identity, state));
    } else if identity.is_revoked() {
        println!("Identity {} revoked ({}).", identity.id, reason.as_openssl());
    } else {
        println!("Identity {} has no certificate; nothing to revoke.", identity.id);
    }
    Ok(())
}

pub fn remove(cli: &Cli, id: &str, reason: RevocationReason) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    let org = ctx.selected_org(cli)?;
    let identity = ctx.load_identity(&org, id)?;
    let identity_id = identity.id.clone();
    let report = ctx.manager.remove(&org, identity, reason)?;

    if ctx.json {
        print_json(&format::cleanup_json(&identity_id, &report));
    } else {
        println!("Identity {identity_id} removed.");
        format::cleanup_detail(&report);
    }
    Ok(())
}
