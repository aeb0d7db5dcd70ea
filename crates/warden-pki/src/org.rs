//! Organizations and the servers their identities connect to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warden_common::encoding::pem_block;
use warden_common::id::generate_identity_id;
use warden_common::persist;
use warden_crypto::fingerprint::fingerprint_sha256;

use crate::engine::{CaEngine, CrlJob};
use crate::error::PkiError;
use crate::identity::CA_IDENTITY_ID;
use crate::layout::{self, IdentityPaths, CRL_FILENAME, MANIFEST_FILENAME, TEMP_DIR};
use crate::locks::IdentityLockTable;
use crate::sslconf;

fn default_protocol() -> String {
    "udp".to_string()
}

/// Connection parameters of one VPN server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub id: String,
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub public_address: String,
    pub port: u16,
    /// Clients must also send a one-time passcode.
    #[serde(default)]
    pub otp_auth: bool,
}

/// The owner of a set of identities and their CA.
pub trait Organization: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn root(&self) -> &Path;

    fn servers(&self) -> Result<Vec<ServerProfile>, PkiError>;

    fn server(&self, server_id: &str) -> Result<ServerProfile, PkiError> {
        self.servers()?
            .into_iter()
            .find(|s| s.id == server_id)
            .ok_or_else(|| PkiError::NotFound(format!("server {server_id}")))
    }

    /// Materialize the CA certificate clients of `server` must trust and
    /// return its path.
    fn server_ca_cert(&self, server: &ServerProfile) -> Result<PathBuf, PkiError>;

    /// Rewrite the org's revocation list.
    fn generate_crl(&self) -> Result<(), PkiError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub servers: Vec<ServerProfile>,
}

/// [`Organization`] stored as `org.json` under its root directory.
pub struct FileOrganization {
    root: PathBuf,
    manifest: OrgManifest,
    engine: Arc<dyn CaEngine>,
    key_bits: u32,
}

impl FileOrganization {
    /// Lay out a new org at `root`. Fails if one already lives there.
    pub fn create(
        root: PathBuf,
        id: &str,
        name: &str,
        engine: Arc<dyn CaEngine>,
        key_bits: u32,
    ) -> Result<Self, PkiError> {
        let manifest_path = root.join(MANIFEST_FILENAME);
        if manifest_path.exists() {
            return Err(PkiError::AlreadyExists(format!("organization at {}", root.display())));
        }

        layout::ensure_org_layout(&root)?;
        let org = Self {
            root,
            manifest: OrgManifest {
                id: id.to_string(),
                name: name.to_string(),
                servers: Vec::new(),
            },
            engine,
            key_bits,
        };
        org.save()?;
        tracing::info!(org_id = id, root = %org.root.display(), "Organization created");
        Ok(org)
    }

    pub fn open(root: PathBuf, engine: Arc<dyn CaEngine>, key_bits: u32) -> Result<Self, PkiError> {
        let manifest: OrgManifest = persist::read_json_if_exists(&root.join(MANIFEST_FILENAME))?
            .ok_or_else(|| PkiError::NotFound(format!("organization at {}", root.display())))?;
        Ok(Self {
            root,
            manifest,
            engine,
            key_bits,
        })
    }

    fn save(&self) -> Result<(), PkiError> {
        persist::write_json_pretty(&self.root.join(MANIFEST_FILENAME), &self.manifest)?;
        Ok(())
    }

    /// Add `server`, replacing any server with the same id.
    pub fn upsert_server(&mut self, server: ServerProfile) -> Result<(), PkiError> {
        self.manifest.servers.retain(|s| s.id != server.id);
        self.manifest.servers.push(server);
        self.save()
    }

    pub fn remove_server(&mut self, server_id: &str) -> Result<(), PkiError> {
        let before = self.manifest.servers.len();
        self.manifest.servers.retain(|s| s.id != server_id);
        if self.manifest.servers.len() == before {
            return Err(PkiError::NotFound(format!("server {server_id}")));
        }
        self.save()
    }

    pub fn manifest(&self) -> &OrgManifest {
        &self.manifest
    }

    /// SHA-256 fingerprint of the CA certificate's DER encoding.
    pub fn ca_fingerprint(&self) -> Result<String, PkiError> {
        let (path, block) = self.ca_cert_block()?;
        let der = pem::parse(&block)
            .map_err(|e| PkiError::Parse(format!("{}: {e}", path.display())))?;
        Ok(fingerprint_sha256(der.contents()))
    }

    /// The CA certificate's PEM block, without any text dump in front.
    fn ca_cert_block(&self) -> Result<(PathBuf, String), PkiError> {
        let ca_cert = IdentityPaths::new(&self.root, CA_IDENTITY_ID).cert;
        if !ca_cert.is_file() {
            return Err(PkiError::CaNotInitialized(self.id().to_string()));
        }
        let text = std::fs::read_to_string(&ca_cert)?;
        let block = pem_block(&text, "CERTIFICATE")
            .ok_or_else(|| PkiError::Parse(format!("{}: no certificate block", ca_cert.display())))?
            .to_string();
        Ok((ca_cert, block))
    }
}

impl Organization for FileOrganization {
    fn id(&self) -> &str {
        &self.manifest.id
    }

    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn servers(&self) -> Result<Vec<ServerProfile>, PkiError> {
        Ok(self.manifest.servers.clone())
    }

    fn server_ca_cert(&self, server: &ServerProfile) -> Result<PathBuf, PkiError> {
        let (_, block) = self.ca_cert_block()?;
        let path = layout::server_ca_path(&self.root, &server.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, format!("{block}\n"))?;
        Ok(path)
    }

    fn generate_crl(&self) -> Result<(), PkiError> {
        // One regeneration per org at a time in this process; the config
        // name is unique so other processes never remove it underneath us.
        IdentityLockTable::global().with_lock(&format!("crl-{}", self.id()), || {
            let config_path = self
                .root
                .join(TEMP_DIR)
                .join(format!("crl-{}.conf", generate_identity_id()));
            sslconf::write(&config_path, self.id(), &self.root, self.key_bits, CA_IDENTITY_ID)?;

            let crl_path = self.root.join(CRL_FILENAME);
            let result = self.engine.generate_crl(&CrlJob {
                org_root: &self.root,
                config_path: &config_path,
                crl_path: &crl_path,
            });
            if let Err(e) = sslconf::remove(&config_path) {
                tracing::debug!(org_id = self.id(), error = %e, "Failed to remove CRL config");
            }

            result.map_err(|source| {
                tracing::error!(org_id = self.id(), error = %source, "Failed to generate CRL");
                PkiError::Engine {
                    op: "generate_crl",
                    org_id: self.id().to_string(),
                    identity_id: CA_IDENTITY_ID.to_string(),
                    source,
                }
            })
        })
    }
}
