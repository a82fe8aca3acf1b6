//! medauth CLI - operator tooling for the session store
//!
//! Usage:
//!   medauth check
//!   medauth migrate
//!   medauth sessions list <user-id> [--all]
//!   medauth sessions revoke <session-id> [--reason <reason>]
//!   medauth sessions revoke-all <user-id> [--reason <reason>]
//!   medauth user lock <user-id> --reason <reason> [--hours <n>]
//!   medauth user unlock <user-id>
//!   medauth token hash <token>
//!   medauth token generate [--bytes <n>]
//!   medauth token revoked <jti> [--refresh]

use anyhow::Context;
use clap::{Parser, Subcommand};
use medauth_auth::{
    generate_secure_token, hash_token, AuthServices, PasswordHasher, TokenType,
};
use medauth_core::{AppConfig, EnvSecretProvider, LoggingConfig, SessionSecrets};
use medauth_store::{DurableStore, FastCache, PgStore, RedisCache};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "medauth")]
#[command(about = "Session and account administration for medauth")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables still override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check secrets, cache and database connectivity
    Check,
    /// Create the database schema if missing
    Migrate,
    /// Inspect and revoke sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Lock or unlock accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Token utilities
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List a user's sessions, newest first
    List {
        user_id: Uuid,
        /// Include revoked sessions
        #[arg(long)]
        all: bool,
    },
    /// Revoke one session
    Revoke {
        session_id: Uuid,
        #[arg(long, default_value = "admin_revoked")]
        reason: String,
    },
    /// Revoke every active session of a user
    RevokeAll {
        user_id: Uuid,
        #[arg(long, default_value = "admin_revoked_all")]
        reason: String,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Suspend an account and end its sessions
    Lock {
        user_id: Uuid,
        #[arg(long)]
        reason: String,
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Reactivate an account and reset its failed login counter
    Unlock { user_id: Uuid },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Print the stored digest of a one-time token
    Hash { token: String },
    /// Generate a random hex token
    Generate {
        #[arg(long, default_value_t = 32)]
        bytes: usize,
    },
    /// Check whether a token ID carries a revocation record
    Revoked {
        jti: String,
        /// Look up a refresh token ID instead of an access token ID
        #[arg(long)]
        refresh: bool,
    },
}

/// Connected backends plus the services wired over them
struct Runtime {
    cache: Arc<dyn FastCache>,
    store: Arc<dyn DurableStore>,
    pg: Arc<PgStore>,
    services: AuthServices,
}

impl Runtime {
    async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let secrets = SessionSecrets::resolve(&EnvSecretProvider::new(), config.environment)
            .await
            .context("Failed to resolve signing secrets")?;

        let cache: Arc<dyn FastCache> = Arc::new(
            RedisCache::connect(&config.cache.redis_url)
                .await
                .context("Failed to connect to Redis")?,
        );
        let pg = Arc::new(
            PgStore::connect(&config.database.postgres_url, config.database.pool_size)
                .await
                .context("Failed to connect to PostgreSQL")?,
        );
        let store: Arc<dyn DurableStore> = pg.clone();

        let services = AuthServices::new(
            cache.clone(),
            store.clone(),
            &secrets,
            config,
            PasswordHasher::default(),
        );

        Ok(Self {
            cache,
            store,
            pg,
            services,
        })
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Token { action } => run_token(action, &config, cli.json).await,
        Commands::Check => {
            let runtime = Runtime::connect(&config).await?;
            runtime.cache.ping().await.context("Redis ping failed")?;
            runtime
                .store
                .health_check()
                .await
                .context("PostgreSQL health check failed")?;
            info!(
                environment = %config.environment,
                cache = runtime.cache.backend_name(),
                store = runtime.store.backend_name(),
                "All checks passed"
            );
            println!(
                "ok: environment={} cache={} store={}",
                config.environment,
                runtime.cache.backend_name(),
                runtime.store.backend_name()
            );
            Ok(())
        }
        Commands::Migrate => {
            let runtime = Runtime::connect(&config).await?;
            runtime.pg.apply_schema().await?;
            println!("schema applied");
            Ok(())
        }
        Commands::Sessions { action } => {
            let runtime = Runtime::connect(&config).await?;
            run_sessions(action, &runtime, cli.json).await
        }
        Commands::User { action } => {
            let runtime = Runtime::connect(&config).await?;
            run_user(action, &runtime, cli.json).await
        }
    }
}

async fn run_sessions(action: SessionAction, runtime: &Runtime, json: bool) -> anyhow::Result<()> {
    let accounts = &runtime.services.accounts;
    let issuer = &runtime.services.issuer;

    match action {
        SessionAction::List { user_id, all } => {
            let sessions = accounts.list_sessions(user_id, !all).await?;
            if json {
                return print_json(&sessions);
            }
            if sessions.is_empty() {
                println!("no sessions");
            }
            for s in sessions {
                println!(
                    "{}  {}  created={}  device={}  ip={}{}",
                    s.id,
                    if s.is_active { "active " } else { "revoked" },
                    s.created_at.to_rfc3339(),
                    s.device_name.as_deref().unwrap_or("-"),
                    s.ip_address.as_deref().unwrap_or("-"),
                    s.revoked_reason
                        .map(|r| format!("  reason={r}"))
                        .unwrap_or_default(),
                );
            }
        }
        SessionAction::Revoke { session_id, reason } => {
            let revoked = issuer.revoke_session(session_id, &reason).await?;
            if !revoked {
                anyhow::bail!("session {session_id} not found");
            }
            println!("revoked session {session_id}");
        }
        SessionAction::RevokeAll { user_id, reason } => {
            let count = issuer.revoke_all_user_sessions(user_id, &reason).await?;
            if json {
                return print_json(&serde_json::json!({ "user_id": user_id, "revoked": count }));
            }
            println!("revoked {count} sessions for {user_id}");
        }
    }
    Ok(())
}

async fn run_user(action: UserAction, runtime: &Runtime, json: bool) -> anyhow::Result<()> {
    let accounts = &runtime.services.accounts;

    match action {
        UserAction::Lock {
            user_id,
            reason,
            hours,
        } => {
            let revoked = accounts
                .lock_user(user_id, &reason, chrono::Duration::hours(hours))
                .await?;
            if json {
                return print_json(&serde_json::json!({
                    "user_id": user_id,
                    "locked_hours": hours,
                    "sessions_revoked": revoked,
                }));
            }
            println!("locked {user_id} for {hours}h, revoked {revoked} sessions");
        }
        UserAction::Unlock { user_id } => {
            let user = accounts.unlock_user(user_id, None).await?;
            if json {
                return print_json(&user);
            }
            println!("unlocked {} ({})", user.id, user.email);
        }
    }
    Ok(())
}

async fn run_token(action: TokenAction, config: &AppConfig, json: bool) -> anyhow::Result<()> {
    match action {
        TokenAction::Hash { token } => println!("{}", hash_token(&token)),
        TokenAction::Generate { bytes } => {
            anyhow::ensure!(bytes > 0, "--bytes must be positive");
            println!("{}", generate_secure_token(bytes));
        }
        TokenAction::Revoked { jti, refresh } => {
            let runtime = Runtime::connect(config).await?;
            let token_type = if refresh {
                TokenType::Refresh
            } else {
                TokenType::Access
            };
            let revoked = runtime
                .services
                .issuer
                .is_blacklisted(token_type, &jti)
                .await?;
            if json {
                return print_json(&serde_json::json!({ "jti": jti, "revoked": revoked }));
            }
            println!("{}", if revoked { "revoked" } else { "no revocation record" });
        }
    }
    Ok(())
}
