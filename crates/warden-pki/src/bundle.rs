//! Client credential bundles.
//!
//! A bundle is a tar archive at `temp/<id>.tar` with one profile per
//! server of the identity's organization. Separate mode ships the key,
//! certificate and each server's CA certificate as side files; inline
//! mode embeds everything in the profiles. Building only reads the
//! identity's credentials, so it takes no identity lock.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use warden_common::encoding::pem_block;

use crate::error::PkiError;
use crate::identity::Identity;
use crate::layout::{self, IdentityPaths};
use crate::org::{Organization, ServerProfile};
use crate::profile::{self, ClientProfile};

/// Build the identity's bundle and return the archive path.
pub fn build_key_archive(
    org: &dyn Organization,
    identity: &Identity,
    inline: bool,
) -> Result<PathBuf, PkiError> {
    let paths = IdentityPaths::new(org.root(), &identity.id);
    require_credentials(identity, &paths)?;

    if let Some(parent) = paths.archive.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tar = tar::Builder::new(File::create(&paths.archive)?);

    let result = if inline {
        append_inline(&mut tar, org, identity, &paths)
    } else {
        append_separate(&mut tar, org, identity, &paths)
    }
    .and_then(|()| tar.finish().map_err(PkiError::from));

    if let Err(e) = result {
        drop(tar);
        if let Err(rm) = std::fs::remove_file(&paths.archive) {
            tracing::debug!(error = %rm, path = %paths.archive.display(), "Failed to remove partial archive");
        }
        tracing::error!(
            org_id = org.id(),
            identity_id = %identity.id,
            error = %e,
            "Failed to build key archive"
        );
        return Err(e);
    }

    tracing::info!(
        org_id = org.id(),
        identity_id = %identity.id,
        inline,
        path = %paths.archive.display(),
        "Key archive built"
    );
    Ok(paths.archive)
}

/// Render the inline profile for one server without building an archive.
pub fn build_single_profile(
    org: &dyn Organization,
    identity: &Identity,
    server_id: &str,
) -> Result<ClientProfile, PkiError> {
    let paths = IdentityPaths::new(org.root(), &identity.id);
    require_credentials(identity, &paths)?;

    let server = org.server(server_id)?;
    let conf = inline_conf(org, &paths, &server)?;
    Ok(ClientProfile {
        name: profile::entry_name(org.name(), &identity.name, Some(&server.name), "ovpn"),
        conf,
    })
}

fn require_credentials(identity: &Identity, paths: &IdentityPaths) -> Result<(), PkiError> {
    for (what, path) in [("certificate", &paths.cert), ("key", &paths.key)] {
        if !path.is_file() {
            return Err(PkiError::NotFound(format!("{what} for identity {}", identity.id)));
        }
    }
    Ok(())
}

fn append_separate<W: Write>(
    tar: &mut tar::Builder<W>,
    org: &dyn Organization,
    identity: &Identity,
    paths: &IdentityPaths,
) -> Result<(), PkiError> {
    let key_name = profile::entry_name(org.name(), &identity.name, None, "key");
    let cert_name = profile::entry_name(org.name(), &identity.name, None, "crt");
    tar.append_path_with_name(&paths.key, &key_name)?;
    tar.append_path_with_name(&paths.cert, &cert_name)?;

    for server in org.servers()? {
        let ca_name = profile::entry_name(org.name(), &identity.name, Some(&server.name), "crt");
        let ca_path = org.server_ca_cert(&server)?;
        tar.append_path_with_name(&ca_path, &ca_name)?;

        let conf = profile::render_with_files(&server, &ca_name, &cert_name, &key_name);
        append_profile(tar, org, identity, &server, &conf)?;
    }
    Ok(())
}

fn append_inline<W: Write>(
    tar: &mut tar::Builder<W>,
    org: &dyn Organization,
    identity: &Identity,
    paths: &IdentityPaths,
) -> Result<(), PkiError> {
    for server in org.servers()? {
        let conf = inline_conf(org, paths, &server)?;
        append_profile(tar, org, identity, &server, &conf)?;
    }
    Ok(())
}

fn inline_conf(
    org: &dyn Organization,
    paths: &IdentityPaths,
    server: &ServerProfile,
) -> Result<String, PkiError> {
    let ca_path = org.server_ca_cert(server)?;
    let ca_text = std::fs::read_to_string(&ca_path)?;
    let cert_text = std::fs::read_to_string(&paths.cert)?;
    let key_text = std::fs::read_to_string(&paths.key)?;

    let ca_pem = certificate_block(&ca_text, &ca_path)?;
    let cert_pem = certificate_block(&cert_text, &paths.cert)?;
    Ok(profile::render_inline(server, ca_pem, cert_pem, &key_text))
}

fn certificate_block<'a>(text: &'a str, path: &Path) -> Result<&'a str, PkiError> {
    pem_block(text, "CERTIFICATE")
        .ok_or_else(|| PkiError::Parse(format!("{}: no certificate block", path.display())))
}

/// Stage `conf` in an owner-only temp file, add it to the archive and
/// remove the temp file again.
fn append_profile<W: Write>(
    tar: &mut tar::Builder<W>,
    org: &dyn Organization,
    identity: &Identity,
    server: &ServerProfile,
    conf: &str,
) -> Result<(), PkiError> {
    let temp = layout::temp_profile_path(org.root(), &identity.id, &server.id);
    write_private(&temp, conf)?;

    let entry = profile::entry_name(org.name(), &identity.name, Some(&server.name), "ovpn");
    let result = tar.append_path_with_name(&temp, &entry);
    if let Err(e) = std::fs::remove_file(&temp) {
        tracing::debug!(error = %e, path = %temp.display(), "Failed to remove temp profile");
    }
    result.map_err(PkiError::from)
}

fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // mode() only applies on creation; tighten a leftover file too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents.as_bytes())
}
