//! ezwarden - remote ezjail lifecycle manager
//!
//! Drives ezjail-admin on a FreeBSD host over ssh to create, start, stop
//! and terminate jails, with mount provisioning, zfs dataset resolution
//! and one-shot startup scripts.

mod bridge;
mod cli;
mod console;
mod error;
mod jail;
mod manifest;
mod provision;
mod remote;
mod startup;
mod template;
mod zfs;

#[cfg(test)]
mod testing;

use bridge::Bridge;
use cli::{Cli, Commands};
use error::Result;
use jail::StartOverrides;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Log to stderr; RUST_LOG overrides the default level
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .init();
}

fn run(cli: Cli) -> Result<()> {
    // Commands that don't require config
    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    let manifest = manifest::load(&cli.config)?;
    let bridge = Bridge::new(manifest);

    match cli.command {
        Commands::Status { instance } => {
            bridge.jail(&instance)?.status()?;
        }
        Commands::Start {
            instance,
            startup_script,
        } => {
            let overrides = StartOverrides { startup_script };
            bridge.jail(&instance)?.start(&overrides)?;
        }
        Commands::Stop { instance } => {
            bridge.jail(&instance)?.stop()?;
        }
        Commands::Terminate { instance } => {
            bridge.jail(&instance)?.terminate()?;
        }
        Commands::Fingerprints { instance, json } => {
            let keys = bridge.jail(&instance)?.fingerprints()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else {
                for key in &keys {
                    println!("{} {} ({})", key.keylen, key.fingerprint, key.keytype);
                }
            }
        }
        Commands::Ps { json } => {
            let report = bridge.ps()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Check => {
            bridge.check()?;
        }
        // Already handled above
        Commands::Completion { .. } => unreachable!(),
    }

    Ok(())
}
