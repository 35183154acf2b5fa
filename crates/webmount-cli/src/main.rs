//! webmount binary.
//!
//! Builds the namespace described by a config file and runs filesystem
//! operations against it, the same ones a FUSE adapter would issue.
//!
//! Usage:
//!   webmount --config site.toml ls /
//!   webmount --config site.toml -u alice cat /account/content
//!   WEBMOUNT_PASSWORD=secret webmount -c site.toml login
//!   webmount -c site.toml batch < script.txt
//!
//! Logging goes to stderr; `RUST_LOG=webmount_kernel=debug` shows cache and
//! session activity.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

use webmount_kernel::constants::USER_AGENT;
use webmount_kernel::{Config, Namespace, ReqwestTransport};

use commands::{Command, run, run_batch};

/// Browse a website's content as a filesystem.
#[derive(Parser, Debug)]
#[command(name = "webmount", version)]
#[command(about = "Browse a website's content as a filesystem")]
struct Args {
    /// TOML config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Username, overriding the config file
    #[arg(short, long)]
    username: Option<String>,

    /// Environment variable holding the password
    #[arg(long, default_value = "WEBMOUNT_PASSWORD")]
    password_env: String,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match execute(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("webmount: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn build(args: &Args) -> Result<Namespace> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(username) = &args.username {
        config.login.username = Some(username.clone());
    }

    let transport = ReqwestTransport::new(USER_AGENT).context("building HTTP client")?;
    let namespace = config.build_namespace(Arc::new(transport))?;

    if let Ok(password) = std::env::var(&args.password_env) {
        namespace.session().set_password(&password).await;
    }
    tracing::info!(base_url = %config.base_url, mounts = ?namespace.mounts(), "namespace ready");
    Ok(namespace)
}

/// Returns false when a command failed in a way already reported.
async fn execute(args: Args) -> Result<bool> {
    let namespace = build(&args).await?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if args.command == Command::Batch {
        let mut script = String::new();
        std::io::stdin()
            .read_to_string(&mut script)
            .context("reading batch script from stdin")?;
        let failures = run_batch(&namespace, &script, &mut out).await?;
        out.flush()?;
        return Ok(failures == 0);
    }

    if let Err(e) = run(&namespace, &args.command, &mut out).await {
        out.flush()?;
        eprintln!("webmount: {}", e.report());
        return Ok(false);
    }
    out.flush()?;
    Ok(true)
}
