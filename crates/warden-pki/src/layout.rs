//! Filesystem layout under an organization root.

use std::path::{Path, PathBuf};

pub const REQS_DIR: &str = "reqs";
pub const TEMP_DIR: &str = "temp";
pub const KEYS_DIR: &str = "keys";
pub const CERTS_DIR: &str = "certs";
pub const USERS_DIR: &str = "users";
pub const SERVERS_DIR: &str = "servers";

pub const INDEX_FILENAME: &str = "indexed.txt";
pub const SERIAL_FILENAME: &str = "serial";
pub const CRL_FILENAME: &str = "ca.crl";
pub const MANIFEST_FILENAME: &str = "org.json";
pub const REVOKED_FILENAME: &str = "revoked.json";

const LAYOUT_DIRS: [&str; 6] = [REQS_DIR, TEMP_DIR, KEYS_DIR, CERTS_DIR, USERS_DIR, SERVERS_DIR];

/// Every file derived from one identity id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPaths {
    pub request: PathBuf,
    pub ssl_conf: PathBuf,
    pub key: PathBuf,
    pub cert: PathBuf,
    pub archive: PathBuf,
    pub record: PathBuf,
}

impl IdentityPaths {
    pub fn new(org_root: &Path, identity_id: &str) -> Self {
        Self {
            request: org_root.join(REQS_DIR).join(format!("{identity_id}.csr")),
            ssl_conf: org_root.join(TEMP_DIR).join(format!("{identity_id}.conf")),
            key: org_root.join(KEYS_DIR).join(format!("{identity_id}.key")),
            cert: org_root.join(CERTS_DIR).join(format!("{identity_id}.crt")),
            archive: org_root.join(TEMP_DIR).join(format!("{identity_id}.tar")),
            record: org_root.join(USERS_DIR).join(format!("{identity_id}.conf")),
        }
    }

    /// Files removed when the identity is deleted, labelled for logging.
    /// The archive is a build product and is not part of the identity.
    pub fn owned_files(&self) -> [(&'static str, &Path); 5] {
        [
            ("request", self.request.as_path()),
            ("ssl_conf", self.ssl_conf.as_path()),
            ("key", self.key.as_path()),
            ("cert", self.cert.as_path()),
            ("record", self.record.as_path()),
        ]
    }
}

/// Temp location of one rendered client profile.
pub fn temp_profile_path(org_root: &Path, identity_id: &str, server_id: &str) -> PathBuf {
    org_root
        .join(TEMP_DIR)
        .join(format!("{identity_id}_{server_id}.ovpn"))
}

/// CA certificate file handed to clients of one server.
pub fn server_ca_path(org_root: &Path, server_id: &str) -> PathBuf {
    org_root.join(SERVERS_DIR).join(server_id).join("ca.crt")
}

pub fn users_dir(org_root: &Path) -> PathBuf {
    org_root.join(USERS_DIR)
}

/// Create the directory tree and the CA database files if missing.
/// Existing files are left untouched.
pub fn ensure_org_layout(org_root: &Path) -> std::io::Result<()> {
    for dir in LAYOUT_DIRS {
        std::fs::create_dir_all(org_root.join(dir))?;
    }

    let index = org_root.join(INDEX_FILENAME);
    if !index.exists() {
        std::fs::write(&index, "")?;
    }
    let serial = org_root.join(SERIAL_FILENAME);
    if !serial.exists() {
        std::fs::write(&serial, "01\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_common::test::temp_dir;

    #[test]
    fn identity_paths_follow_layout() {
        let root = Path::new("/orgs/o1");
        let paths = IdentityPaths::new(root, "abc");
        assert_eq!(paths.request, root.join("reqs/abc.csr"));
        assert_eq!(paths.ssl_conf, root.join("temp/abc.conf"));
        assert_eq!(paths.key, root.join("keys/abc.key"));
        assert_eq!(paths.cert, root.join("certs/abc.crt"));
        assert_eq!(paths.archive, root.join("temp/abc.tar"));
        assert_eq!(paths.record, root.join("users/abc.conf"));
    }

    #[test]
    fn owned_files_exclude_archive() {
        let paths = IdentityPaths::new(Path::new("/o"), "abc");
        assert!(paths
            .owned_files()
            .iter()
            .all(|(_, p)| *p != paths.archive.as_path()));
    }

    #[test]
    fn temp_profile_is_per_identity_and_server() {
        assert_eq!(
            temp_profile_path(Path::new("/o"), "abc", "srv1"),
            Path::new("/o/temp/abc_srv1.ovpn")
        );
    }

    #[test]
    fn ensure_layout_is_idempotent() {
        let root = temp_dir("layout");
        ensure_org_layout(&root).unwrap();
        std::fs::write(root.join(SERIAL_FILENAME), "0A\n").unwrap();
        ensure_org_layout(&root).unwrap();

        for dir in LAYOUT_DIRS {
            assert!(root.join(dir).is_dir(), "{dir} missing");
        }
        assert!(root.join(INDEX_FILENAME).is_file());
        assert_eq!(
            std::fs::read_to_string(root.join(SERIAL_FILENAME)).unwrap(),
            "0A\n"
        );
    }
}
