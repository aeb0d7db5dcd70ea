use warden_pki::PkiSettings;

use super::print_json;
use crate::cli::{Cli, SettingsSubcommand};
use crate::format;

pub fn dispatch(cli: &Cli, command: Option<&SettingsSubcommand>) -> anyhow::Result<()> {
    let path = PkiSettings::default_path();
    let mut settings = PkiSettings::load(&path)?;

    if let Some(SettingsSubcommand::Set {
        key_bits,
        inline_certs,
        engine,
        openssl_bin,
    }) = command
    {
        if let Some(bits) = key_bits {
            if *bits < 2048 {
                anyhow::bail!("Key size {bits} is too small; use at least 2048.");
            }
            settings.key_bits = *bits;
        }
        if let Some(inline) = inline_certs {
            settings.inline_certs = *inline;
        }
        if let Some(engine) = engine {
            settings.engine = *engine;
        }
        if let Some(bin) = openssl_bin {
            settings.openssl_bin = bin.clone();
        }
        settings.save(&path)?;
        tracing::info!(path = %path.display(), "Settings saved");
    }

    if cli.json {
        print_json(&settings);
    } else {
        format::settings_detail(&settings, &path);
    }
    Ok(())
}
