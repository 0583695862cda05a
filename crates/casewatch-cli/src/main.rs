//! casewatch - terminal front end for session and provider status.
//!
//! Logs in (or resumes a remembered session), then prints session and
//! provider changes as they are published while accepting short commands on
//! stdin.
//!
//! Usage: `casewatch [watch|status|logout]`

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use casewatch_core::auth::{CredentialStore, SessionVault};
use casewatch_core::utils::{age_display, quota_display};
use casewatch_core::{
    ApiClient, Config, LoginRequest, ProviderKind, ProviderSnapshot, RefreshMode, SessionState, SyncContext, SyncError,
};

const LOG_FILE_PREFIX: &str = "casewatch.log";

const HELP: &str = "commands: refresh [bot|quota], toggle, spent, status, ack, logout, quit";

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). Output goes to stderr and,
/// when the cache directory is known, to a daily rolling file there. The
/// returned guard must live as long as the process.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load().context("Failed to load config")?;
    if config.ensure_device_id().1 {
        config.save().context("Failed to save device id")?;
    }

    let cache_dir = config.cache_dir().ok();
    if let Some(dir) = &cache_dir {
        let _ = std::fs::create_dir_all(dir);
    }
    let _guard = init_tracing(cache_dir.as_deref());
    info!(version = env!("CARGO_PKG_VERSION"), "casewatch starting");

    let base_url = std::env::var("CASEWATCH_URL").unwrap_or_else(|_| config.base_url().to_string());
    let sync_config = config.sync_config();
    let client = ApiClient::new(&base_url, sync_config.request_timeout)?;
    let ctx = SyncContext::new(Arc::new(client), sync_config);
    let vault = open_vault(&config, cache_dir.as_deref());

    let command = std::env::args().nth(1).unwrap_or_else(|| "watch".to_string());
    let result = match command.as_str() {
        "watch" => {
            sign_in(&ctx, &mut config, vault.as_ref()).await?;
            watch(&ctx, vault.as_ref()).await
        }
        "status" => {
            sign_in(&ctx, &mut config, vault.as_ref()).await?;
            print_refresh_all(&ctx).await;
            Ok(())
        }
        "logout" => sign_out(&ctx, &config, vault.as_ref()).await,
        other => Err(anyhow::anyhow!("Unknown command '{}'. Usage: casewatch [watch|status|logout]", other)),
    };

    ctx.shutdown();
    info!("casewatch shutting down");
    result
}

/// Session vault, when remembering sessions is enabled and the keychain works
fn open_vault(config: &Config, cache_dir: Option<&Path>) -> Option<SessionVault> {
    if !config.remember_session {
        return None;
    }
    let cache_dir = cache_dir?;
    match CredentialStore::vault_secret() {
        Ok(secret) => Some(SessionVault::new(cache_dir.to_path_buf(), secret)),
        Err(e) => {
            warn!(error = %e, "Keychain unavailable, sessions will not be remembered");
            None
        }
    }
}

/// Resume a remembered session, or log in interactively.
async fn sign_in(ctx: &SyncContext, config: &mut Config, vault: Option<&SessionVault>) -> Result<()> {
    if let Some(vault) = vault {
        match vault.load() {
            Ok(Some(credential)) => {
                let name = credential.identity.name.clone();
                ctx.restore(credential)?;
                info!(user = %name, "Resumed remembered session");
                println!("Resumed session for {}", name);
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session vault");
                let _ = vault.clear();
            }
        }
    }

    let username = match std::env::var("CASEWATCH_USERNAME") {
        Ok(username) => username,
        Err(_) => match config.last_username.clone() {
            Some(last) => last,
            None => prompt("Username: ")?,
        },
    };
    let password = match std::env::var("CASEWATCH_PASSWORD") {
        Ok(password) => password,
        Err(_) => match CredentialStore::get_password(&username) {
            Ok(stored) => stored,
            Err(_) => rpassword::prompt_password(format!("Password for {}: ", username))?,
        },
    };

    let request = LoginRequest::new(&username, &password, config.device_descriptor());
    let credential = match ctx.login(&request).await {
        Ok(credential) => credential,
        Err(SyncError::Conflict(conflict)) => {
            println!("Already signed in on {}.", conflict.existing_device);
            if !confirm("Sign in here and end that session? [y/N] ")? {
                anyhow::bail!("Login cancelled");
            }
            ctx.login(&request.forced()).await?
        }
        Err(e) => return Err(anyhow::anyhow!(e.user_message())),
    };

    println!("Signed in as {}", credential.identity.name);
    if config.last_username.as_deref() != Some(username.as_str()) {
        config.last_username = Some(username.clone());
        config.save()?;
    }
    if let Some(vault) = vault {
        if let Err(e) = CredentialStore::store(&username, &password) {
            warn!(error = %e, "Failed to remember password");
        }
        if let Err(e) = vault.save(&credential) {
            warn!(error = %e, "Failed to remember session");
        }
    }
    Ok(())
}

/// End the remembered session and forget its secrets
async fn sign_out(ctx: &SyncContext, config: &Config, vault: Option<&SessionVault>) -> Result<()> {
    let Some(vault) = vault else {
        println!("No remembered session");
        return Ok(());
    };
    match vault.load()? {
        Some(credential) => {
            ctx.restore(credential)?;
            if let Err(e) = ctx.logout().await {
                warn!(error = %e, "Server was not notified of logout");
            }
            println!("Signed out");
        }
        None => println!("No remembered session"),
    }
    vault.clear()?;
    if let Some(username) = config.last_username.as_deref() {
        let _ = CredentialStore::delete(username);
    }
    Ok(())
}

/// Print published changes until the user quits or the session ends.
async fn watch(ctx: &SyncContext, vault: Option<&SessionVault>) -> Result<()> {
    let mut session_rx = ctx.subscribe_session();
    let mut bot_rx = ctx.subscribe_provider(ProviderKind::Bot);
    let mut quota_rx = ctx.subscribe_provider(ProviderKind::Quota);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", HELP);
    loop {
        tokio::select! {
            changed = session_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = session_rx.borrow_and_update().clone();
                if let SessionState::Invalidated { reason } = state {
                    println!("Session ended: {}. Type 'ack' to sign out.", reason);
                }
            }
            changed = bot_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = bot_rx.borrow_and_update().clone();
                print_snapshot(ProviderKind::Bot, &snapshot);
            }
            changed = quota_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = quota_rx.borrow_and_update().clone();
                print_snapshot(ProviderKind::Quota, &snapshot);
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !run_command(ctx, vault, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Returns false when the watch loop should end
async fn run_command(ctx: &SyncContext, vault: Option<&SessionVault>, line: &str) -> bool {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => {}
        (Some("refresh"), None) => print_refresh_all(ctx).await,
        (Some("refresh"), Some(which)) => {
            let kind = match which {
                "bot" => ProviderKind::Bot,
                "quota" => ProviderKind::Quota,
                _ => {
                    println!("Unknown provider '{}'", which);
                    return true;
                }
            };
            if let Err(e) = ctx.refresh_provider(kind, RefreshMode::Manual).await {
                println!("{} refresh failed: {}", kind.display_name(), e.user_message());
            }
        }
        (Some("toggle"), _) => match ctx.toggle_provider().await {
            Ok(snapshot) => println!("Alternate provider preferred: {}", snapshot.preferred_alternate),
            Err(e) => println!("Toggle failed: {}", e.user_message()),
        },
        (Some("spent"), _) => {
            if let Err(e) = ctx.record_quota_spent() {
                println!("{}", e.user_message());
            }
        }
        (Some("status"), _) => {
            println!("Session: {:?}", ctx.session_state());
            for kind in [ProviderKind::Bot, ProviderKind::Quota] {
                print_snapshot(kind, &ctx.snapshot(kind));
            }
        }
        (Some("ack"), _) => {
            if ctx.acknowledge_invalidation().await {
                forget_session(vault);
                println!("Signed out");
                return false;
            }
            println!("Nothing to acknowledge");
        }
        (Some("logout"), _) => {
            if let Err(e) = ctx.logout().await {
                warn!(error = %e, "Server was not notified of logout");
            }
            forget_session(vault);
            println!("Signed out");
            return false;
        }
        (Some("quit"), _) | (Some("exit"), _) => return false,
        _ => println!("{}", HELP),
    }
    true
}

async fn print_refresh_all(ctx: &SyncContext) {
    for (kind, result) in ctx.refresh_all().await {
        match result {
            Ok(snapshot) => print_snapshot(kind, &snapshot),
            Err(e) => println!("{} refresh failed: {}", kind.display_name(), e.user_message()),
        }
    }
}

fn print_snapshot(kind: ProviderKind, snapshot: &ProviderSnapshot) {
    match snapshot.last_updated {
        Some(at) => println!("{} (updated {})", quota_display(kind, snapshot), age_display(at, Utc::now())),
        None => println!("{}", quota_display(kind, snapshot)),
    }
}

fn forget_session(vault: Option<&SessionVault>) {
    if let Some(vault) = vault {
        if let Err(e) = vault.clear() {
            warn!(error = %e, "Failed to clear session vault");
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn confirm(label: &str) -> Result<bool> {
    let answer = prompt(label)?;
    Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
}
