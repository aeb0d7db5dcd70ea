//! Second-factor commands.

use warden_crypto::otp;

use super::{print_json, Context};
use crate::cli::{Cli, OtpSubcommand};

/// A passcode that did not verify. Surfaced as its own error so the
/// process exits with the second-factor status.
#[derive(Debug, thiserror::Error)]
#[error("passcode rejected for identity {0}")]
pub struct PasscodeRejected(pub String);

/// Issuer shown by authenticator apps.
const ISSUER: &str = "Warden";

pub fn dispatch(cli: &Cli, command: &OtpSubcommand) -> anyhow::Result<()> {
    let ctx = Context::load(cli)?;
    let org = ctx.selected_org(cli)?;

    match command {
        OtpSubcommand::Regen { id } => {
            let mut identity = ctx.load_identity(&org, id)?;
            ctx.manager.regenerate_otp_secret(&org, &mut identity)?;
            if ctx.json {
                print_json(&serde_json::json!({
                    "id": identity.id,
                    "otp_secret": identity.otp_secret,
                }));
            } else {
                println!("New OTP secret for {}: {}", identity.id, identity.otp_secret);
            }
            Ok(())
        }
        OtpSubcommand::Verify { id, code } => {
            let identity = ctx.load_identity(&org, id)?;
            let valid = ctx.manager.verify_otp_code(&identity, code)?;
            if ctx.json {
                print_json(&serde_json::json!({ "id": identity.id, "valid": valid }));
            }
            if !valid {
                return Err(PasscodeRejected(identity.id).into());
            }
            if !ctx.json {
                println!("Passcode accepted.");
            }
            Ok(())
        }
        OtpSubcommand::Uri { id, qr } => {
            let identity = ctx.load_identity(&org, id)?;
            let account = format!("{}@{}", identity.name, identity.org_name);
            let uri = otp::build_totp_uri(&identity.otp_secret, ISSUER, &account);
            if ctx.json {
                print_json(&serde_json::json!({ "id": identity.id, "uri": uri }));
            } else {
                println!("{uri}");
                if *qr {
                    println!("\nScan this QR code with your authenticator app:\n");
                    println!(
                        "{}",
                        otp::qr_code_unicode(&identity.otp_secret, ISSUER, &account)
                    );
                }
            }
            Ok(())
        }
    }
}
