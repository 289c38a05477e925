//! hookguard demo
//!
//! Loads configuration, installs logging and runs the guard's boundary
//! operations. Logs go to stderr, results to stdout.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hookguard_auth::config::SigningKeyConfig;
use hookguard_auth::logging::LoggingConfig;
use hookguard_auth::{
    AuthError, DeviceAttributes, Guard, GuardConfig, RateLimitKey, ScopeSet, auth_metrics,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "hookguard-demo",
    version,
    about = "Exercise the hookguard authentication core"
)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); `HOOKGUARD__*` variables override it
    #[arg(long, short = 'c', env = "HOOKGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk through registration, issuance, rotation, reuse detection and rate limiting
    Walkthrough,

    /// Issue a token pair and print it
    Issue {
        /// Token subject
        #[arg(long)]
        subject: String,
        /// Space-delimited scopes (defaults apply when empty)
        #[arg(long, default_value = "")]
        scope: String,
    },

    /// Validate a bearer token
    Validate {
        /// Token to check
        #[arg(long)]
        token: String,
        /// Scopes the token must grant
        #[arg(long = "require", value_delimiter = ',')]
        required: Vec<String>,
    },

    /// Load and validate configuration, then exit
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<GuardConfig> {
    match path {
        Some(path) => GuardConfig::load(Some(path.as_path()))
            .with_context(|| format!("loading {}", path.display())),
        None => {
            // Throwaway key so the demo runs without a file
            let mut config = GuardConfig::default();
            let secret = format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple());
            config.token.signing_keys = vec![SigningKeyConfig::new("ephemeral", secret)];
            config.validate()?;
            info!("No configuration file given, using an ephemeral signing key");
            Ok(config)
        }
    }
}

fn walkthrough(guard: &Guard) -> Result<()> {
    let device = guard.register_device(
        DeviceAttributes::new()
            .with("install_id", "7c1e9a40")
            .with("model", "Pixel 8")
            .with("os_build", "AP2A.240805.005")
            .with_label("demo phone"),
    )?;
    println!("registered   {} (fingerprint {}…)", device.device_id, &device.fingerprint[..12]);

    let pair = guard.issue_token_pair(&device.subject(), ScopeSet::parse("export:create"))?;
    println!("issued       access {} / refresh {}", pair.access.token_id(), pair.refresh.token_id());

    let client = RateLimitKey::device(&device.device_id);
    let claims = guard.authenticate(&client, Some(&pair.access.token), &["export:create"])?;
    println!("validated    sub={} scope=\"{}\"", claims.sub, claims.scope);

    match guard.validate(&pair.access.token, &["export:create", "admin"]) {
        Err(e @ AuthError::InsufficientScope { .. }) => {
            println!("denied       {e} -> {} {}", e.status_code(), e.public_message());
        }
        other => bail!("expected insufficient scope, got {other:?}"),
    }

    let rotated = guard.refresh(&pair.refresh.token)?;
    println!(
        "refreshed    generation {}",
        rotated.refresh.claims.rotation_generation()
    );

    match guard.refresh(&pair.refresh.token) {
        Err(AuthError::ReuseDetected) => {
            println!("reuse        detected, subject tokens revoked");
        }
        other => bail!("expected reuse detection, got {other:?}"),
    }
    match guard.validate(&rotated.access.token, &[]) {
        Err(e) => println!("after reuse  rotated access token rejected: {e}"),
        Ok(_) => bail!("rotated access token survived reuse detection"),
    }

    let ip = RateLimitKey::ip("203.0.113.50");
    let admitted = (0..20).take_while(|_| guard.is_allowed(&ip)).count();
    println!(
        "rate limit   {admitted} admitted, retry after {:.1}s",
        guard.retry_after(&ip).as_secs_f64()
    );

    guard.revoke_device(&device.device_id)?;
    println!("revoked      device active = {}", guard.is_device_active(&device.device_id));

    let report = guard.run_maintenance();
    println!("maintenance  {report:?}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    LoggingConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
    }
    .init()?;
    auth_metrics::init_metrics();

    let config = load_config(cli.config.as_ref())?;

    if let Command::CheckConfig = cli.command {
        println!("configuration ok: service {}", config.service_name);
        return Ok(());
    }

    let guard = std::sync::Arc::new(Guard::from_config(config)?);
    let _maintenance = guard.spawn_maintenance(Duration::from_secs(60));

    match cli.command {
        Command::Walkthrough => walkthrough(&guard)?,
        Command::Issue { subject, scope } => {
            let pair = guard.issue_token_pair(&subject, ScopeSet::parse(&scope))?;
            println!("access_token={}", pair.access.token);
            println!("refresh_token={}", pair.refresh.token);
            println!("expires_at={}", pair.access.expires_at());
        }
        Command::Validate { token, required } => {
            let required: Vec<&str> = required.iter().map(String::as_str).collect();
            match guard.validate(&token, &required) {
                Ok(claims) => println!("valid: sub={} scope=\"{}\" exp={}", claims.sub, claims.scope, claims.exp),
                Err(e) => {
                    println!("rejected: {e} ({})", e.status_code());
                    std::process::exit(1);
                }
            }
        }
        Command::CheckConfig => {}
    }
    Ok(())
}
