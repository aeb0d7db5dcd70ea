//! CLI command handlers.
//!
//! Every handler runs in-process: it opens the organization from the
//! data directory, drives [`IdentityManager`] and prints either a human
//! summary (see [`crate::format`]) or a JSON document.

pub mod bundle;
pub mod identity;
pub mod org;
pub mod otp;
pub mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use warden_common::cache::FileStore;
use warden_common::{id, paths};
use warden_pki::audit;
use warden_pki::events::BroadcastSink;
use warden_pki::{CaEngine, FileOrganization, Identity, IdentityManager, PkiError, PkiSettings};

use crate::cli::Cli;

/// Everything a command needs, built once from settings on disk.
pub(crate) struct Context {
    pub settings: PkiSettings,
    pub engine: Arc<dyn CaEngine>,
    pub manager: IdentityManager,
    pub json: bool,
}

impl Context {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let settings = PkiSettings::load(&PkiSettings::default_path())?;
        let engine = settings.build_engine();
        tracing::debug!(engine = engine.name(), key_bits = settings.key_bits, "Settings loaded");

        // Used-passcode records must outlive a single invocation.
        let manager = IdentityManager::new(
            Arc::clone(&engine),
            Arc::new(FileStore::new(paths::warden_cache_path())),
            Arc::new(BroadcastSink::new(audit::audit_log_path())),
            settings.clone(),
        );
        Ok(Self {
            settings,
            engine,
            manager,
            json: cli.json,
        })
    }

    pub fn open_org(&self, org_id: &str) -> anyhow::Result<FileOrganization> {
        let root = org_root(org_id)?;
        Ok(FileOrganization::open(
            root,
            Arc::clone(&self.engine),
            self.settings.key_bits,
        )?)
    }

    /// Open the `--org` organization.
    pub fn selected_org(&self, cli: &Cli) -> anyhow::Result<FileOrganization> {
        self.open_org(cli.require_org()?)
    }

    pub fn load_identity(
        &self,
        org: &FileOrganization,
        identity_id: &str,
    ) -> anyhow::Result<Identity> {
        Ok(self.manager.load(org, identity_id)?)
    }
}

/// Directory of organization `org_id` under the data directory.
pub(crate) fn org_root(org_id: &str) -> Result<PathBuf, PkiError> {
    if !id::is_valid_identity_id(org_id) {
        return Err(PkiError::InvalidId(org_id.to_string()));
    }
    Ok(paths::warden_orgs_dir().join(org_id))
}

/// Print a serializable value as JSON, handling serialization errors
/// gracefully instead of panicking.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error: failed to serialize response: {e}"),
    }
}
