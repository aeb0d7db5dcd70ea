use std::path::Path;

use warden_pki::bundle;

use super::{print_json, Context};
use crate::cli::Cli;

/// Build the identity's archive, optionally copying it to `output`.
pub fn archive(
    cli: &Cli,
    id: &str,
    inline: Option<bool>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    let org = ctx.selected_org(cli)?;
    let identity = ctx.load_identity(&org, id)?;

    let built = match inline {
        Some(inline) => bundle::build_key_archive(&org, &identity, inline)?,
        None => ctx.manager.build_key_archive(&org, &identity)?,
    };

    let path = match output {
        Some(dest) => {
            std::fs::copy(&built, dest)?;
            if let Err(e) = std::fs::remove_file(&built) {
                tracing::debug!(path = %built.display(), error = %e, "Failed to remove staged archive");
            }
            dest.to_path_buf()
        }
        None => built,
    };

    if ctx.json {
        print_json(&serde_json::json!({ "id": identity.id, "archive": path }));
    } else {
        println!("Bundle written to {}", path.display());
    }
    Ok(())
}

pub fn profile(cli: &Cli, id: &str, server_id: &str) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    let org = ctx.selected_org(cli)?;
    let identity = ctx.load_identity(&org, id)?;
    let profile = ctx.manager.build_single_profile(&org, &identity, server_id)?;

    if ctx.json {
        print_json(&profile);
    } else {
        print!("{}", profile.conf);
    }
    Ok(())
}
