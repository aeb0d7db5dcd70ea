//! Process-wide certificate settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warden_common::{paths, persist};

use crate::engine::{CaEngine, OpensslEngine};
use crate::native::RcgenEngine;

pub const DEFAULT_KEY_BITS: u32 = 2048;

/// Which [`CaEngine`] implementation signs certificates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Openssl,
    Native,
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openssl" => Ok(Self::Openssl),
            "native" => Ok(Self::Native),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PkiSettings {
    /// RSA modulus size written into signing configs.
    pub key_bits: u32,
    /// Bundle profiles with embedded PEM blocks instead of side files.
    pub inline_certs: bool,
    pub engine: EngineKind,
    pub openssl_bin: PathBuf,
}

impl Default for PkiSettings {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_KEY_BITS,
            inline_certs: true,
            engine: EngineKind::default(),
            openssl_bin: PathBuf::from("openssl"),
        }
    }
}

impl PkiSettings {
    pub fn default_path() -> PathBuf {
        paths::warden_settings_path()
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        persist::read_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        persist::write_json_pretty(path, self)
    }

    pub fn build_engine(&self) -> Arc<dyn CaEngine> {
        match self.engine {
            EngineKind::Openssl => Arc::new(OpensslEngine::new(&self.openssl_bin)),
            EngineKind::Native => Arc::new(RcgenEngine::new()),
        }
    }
}
