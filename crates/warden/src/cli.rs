use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use warden_pki::engine::RevocationReason;
use warden_pki::settings::EngineKind;
use warden_pki::IdentityKind;

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Certificates, one-time passcodes and client bundles for VPN identities"
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "WARDEN_LOG", default_value = "info", global = true)]
    pub log_level: String,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to file (in addition to stderr)
    #[arg(long, env = "WARDEN_LOG_FILE", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Data directory holding organizations, settings and logs
    #[arg(long, env = "WARDEN_DATA_DIR", value_name = "PATH", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Organization to operate on
    #[arg(long, env = "WARDEN_ORG", global = true)]
    pub org: Option<String>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Organizations and their servers
    Org(OrgCommand),
    /// Create an identity and issue its certificate
    Create {
        /// Identity kind: ca, server, client
        #[arg(long, default_value = "client")]
        kind: IdentityKind,
        /// Display name
        name: String,
    },
    /// Show one identity
    Show {
        /// Identity id
        id: String,
    },
    /// List identities of the organization
    #[command(name = "ls")]
    List,
    /// Change an identity's display name
    Rename {
        /// Identity id
        id: String,
        /// New display name
        name: String,
    },
    /// Revoke an identity's certificate and refresh the CRL
    Revoke {
        /// Identity id
        id: String,
        /// CRL reason (unspecified, key-compromise, superseded, ...)
        #[arg(long, default_value = "unspecified")]
        reason: RevocationReason,
    },
    /// Revoke an identity and delete its files
    Remove {
        /// Identity id
        id: String,
        /// CRL reason (unspecified, key-compromise, superseded, ...)
        #[arg(long, default_value = "unspecified")]
        reason: RevocationReason,
    },
    /// One-time passcodes
    Otp(OtpCommand),
    /// Build the identity's client bundle (one profile per server)
    Bundle {
        /// Identity id
        id: String,
        /// Embed certificates in the profiles
        #[arg(long, conflicts_with = "separate")]
        inline: bool,
        /// Ship certificates and key as side files
        #[arg(long)]
        separate: bool,
        /// Copy the archive here instead of leaving it in the org's temp dir
        #[arg(long, short, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Print the inline profile of one identity for one server
    Profile {
        /// Identity id
        id: String,
        /// Server id
        server: String,
    },
    /// Show the audit log
    Log,
    /// Show or change process-wide settings
    Settings(SettingsCommand),
}

#[derive(Args, Debug)]
pub struct OrgCommand {
    #[command(subcommand)]
    pub command: OrgSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum OrgSubcommand {
    /// Create an organization and its CA
    Init {
        /// Organization id (directory name)
        id: String,
        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
    },
    /// List organizations
    #[command(name = "ls")]
    List,
    /// Show the organization, its CA and its servers
    Show,
    /// Regenerate the certificate revocation list
    Crl,
    /// Add or replace a server
    AddServer {
        /// Server id
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Public address clients connect to
        #[arg(long)]
        address: String,
        /// Port
        #[arg(long, default_value = "1194")]
        port: u16,
        /// Transport protocol (udp, tcp)
        #[arg(long, default_value = "udp")]
        protocol: String,
        /// Require a one-time passcode at connect time
        #[arg(long)]
        otp: bool,
    },
    /// Remove a server
    RemoveServer {
        /// Server id
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct OtpCommand {
    #[command(subcommand)]
    pub command: OtpSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum OtpSubcommand {
    /// Replace the identity's OTP secret
    Regen {
        /// Identity id
        id: String,
    },
    /// Check (and consume) a passcode
    Verify {
        /// Identity id
        id: String,
        /// Six-digit passcode
        code: String,
    },
    /// Print the provisioning URI for authenticator apps
    Uri {
        /// Identity id
        id: String,
        /// Also render a QR code
        #[arg(long)]
        qr: bool,
    },
}

#[derive(Args, Debug)]
pub struct SettingsCommand {
    #[command(subcommand)]
    pub command: Option<SettingsSubcommand>,
}

#[derive(Subcommand, Debug)]
pub enum SettingsSubcommand {
    /// Update settings; omitted values stay unchanged
    Set {
        /// RSA key size for new identities
        #[arg(long)]
        key_bits: Option<u32>,
        /// Default bundle mode
        #[arg(long)]
        inline_certs: Option<bool>,
        /// Signing backend: openssl, native
        #[arg(long)]
        engine: Option<EngineKind>,
        /// Path to the openssl binary
        #[arg(long, value_name = "PATH")]
        openssl_bin: Option<PathBuf>,
    },
}

impl Cli {
    /// The `--org` value or a clear error.
    pub fn require_org(&self) -> anyhow::Result<&str> {
        self.org.as_deref().ok_or_else(|| {
            anyhow::anyhow!("No organization selected.\nPass --org <ID> or set WARDEN_ORG.")
        })
    }

    /// Bundle mode override from `--inline` / `--separate`.
    pub fn inline_override(inline: bool, separate: bool) -> Option<bool> {
        match (inline, separate) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}
