mod cli;
mod commands;
mod format;

use std::process::ExitCode;

use clap::Parser;
use warden_common::error::ErrorCode;
use warden_pki::PkiError;

use cli::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Path helpers throughout the workspace resolve the data directory
    // from the environment; make `--data-dir` visible to them before any
    // thread starts.
    if let Some(dir) = &cli.data_dir {
        std::env::set_var(warden_common::paths::DATA_DIR_ENV, dir);
    }

    let level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let result = match init_logging(env_filter, cli.log_file.as_deref()) {
        // Hold the non-blocking guards until the command finishes so logs flush.
        Ok(_log_guards) => dispatch(&cli),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = error_code(&e);
            if cli.json {
                commands::print_json(&serde_json::json!({
                    "error": code,
                    "message": format!("{e:#}"),
                }));
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(code.map_or(1, |c| c.exit_code()) as u8)
        }
    }
}

fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Org(org_cmd) => commands::org::dispatch(cli, &org_cmd.command),
        Command::Settings(settings_cmd) => {
            commands::settings::dispatch(cli, settings_cmd.command.as_ref())
        }
        Command::Log => commands::org::audit_log(cli),
        Command::Create { kind, name } => commands::identity::create(cli, *kind, name),
        Command::Show { id } => commands::identity::show(cli, id),
        Command::List => commands::identity::list(cli),
        Command::Rename { id, name } => commands::identity::rename(cli, id, name),
        Command::Revoke { id, reason } => commands::identity::revoke(cli, id, *reason),
        Command::Remove { id, reason } => commands::identity::remove(cli, id, *reason),
        Command::Otp(otp_cmd) => commands::otp::dispatch(cli, &otp_cmd.command),
        Command::Bundle {
            id,
            inline,
            separate,
            output,
        } => commands::bundle::archive(
            cli,
            id,
            Cli::inline_override(*inline, *separate),
            output.as_deref(),
        ),
        Command::Profile { id, server } => commands::bundle::profile(cli, id, server),
    }
}

/// Machine-readable code for errors that came out of the lifecycle layer.
fn error_code(err: &anyhow::Error) -> Option<ErrorCode> {
    err.chain().find_map(|cause| {
        if let Some(pki) = cause.downcast_ref::<PkiError>() {
            Some(ErrorCode::from(pki))
        } else if cause.is::<commands::otp::PasscodeRejected>() {
            Some(ErrorCode::InvalidTotp)
        } else {
            None
        }
    })
}

/// Initialize the tracing subscriber with stderr output and an optional
/// log file.
///
/// Returns guards that must be held for the lifetime of the process so
/// the non-blocking writers flush on exit.
pub(crate) fn init_logging(
    env_filter: tracing_subscriber::EnvFilter,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Vec<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    // Non-blocking stderr keeps a redirected, unread pipe from stalling
    // the command.
    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(nb_stderr);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (nb_file, file_guard) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(nb_file);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();

        Ok(vec![stderr_guard, file_guard])
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();

        Ok(vec![stderr_guard])
    }
}
