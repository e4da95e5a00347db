use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use pim_sync::config::{self, Config};
use pim_sync::db::{self, ConnectionState};
use pim_sync::ingest::IngestClient;
use pim_sync::logsink::DbLogSink;
use pim_sync::model::{ChannelConfig, RunKind};
use pim_sync::pim::{PimClient, PimService};
use pim_sync::sync::{self, RetryPolicies, WorkflowEnv, DEFAULT_MEDIA_CONCURRENCY};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate PIM credentials, discover the channel and store the tenant
    /// connection.
    Prepare {
        #[arg(long)]
        tenant: Uuid,
        /// Base URL of the PIM instance.
        #[arg(long)]
        pim_url: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "PIM_PASSWORD")]
        password: String,
        /// Base64-encoded `client_id:client_secret` for the PIM token
        /// endpoint.
        #[arg(long, env = "PIM_CLIENT_SECRET")]
        client_secret: String,
    },
    /// Run a synchronization for a prepared tenant.
    Sync {
        #[arg(long)]
        tenant: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/pim-sync.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Prepare {
            tenant,
            pim_url,
            username,
            password,
            client_secret,
        } => prepare(&cfg, &pool, tenant, pim_url, username, password, client_secret).await,
        Command::Sync { tenant } => run_sync(&cfg, pool, tenant).await,
    }
}

/// Verify the credentials against the PIM, pick its first channel and persist
/// the tenant connection.
async fn prepare(
    cfg: &Config,
    pool: &db::Pool,
    tenant: Uuid,
    pim_url: String,
    username: String,
    password: String,
    client_secret: String,
) -> Result<()> {
    let pim = PimClient::new(&pim_url, username.clone(), password.clone(), client_secret.clone())?;
    let (token, _) = pim.acquire_token().await?;
    let channels = pim.fetch_channels(&token).await?;
    let channel = channels.first().context("PIM has no channels configured")?;
    let channel_name = channel
        .labels
        .values()
        .next()
        .cloned()
        .unwrap_or_else(|| channel.code.clone());

    let connection = ConnectionState {
        tenant_id: tenant,
        pim_url,
        username,
        password,
        client_secret,
        provider_client_id: cfg.provider.client_id.clone(),
        is_alive: true,
        is_synchronizing: false,
        channel: ChannelConfig {
            channel_code: channel.code.clone(),
            channel_name,
            category_tree: channel.category_tree.clone(),
        },
    };
    db::upsert_connection(pool, &connection).await?;
    info!(%tenant, channel = %connection.channel.channel_code, "tenant connection prepared");
    Ok(())
}

async fn run_sync(cfg: &Config, pool: db::Pool, tenant: Uuid) -> Result<()> {
    let connection = db::get_connection(&pool, tenant)
        .await?
        .with_context(|| format!("no prepared connection for tenant {tenant}"))?;

    let pim = PimClient::new(
        &connection.pim_url,
        connection.username.clone(),
        connection.password.clone(),
        connection.client_secret.clone(),
    )?;
    let ingest = IngestClient::new(&cfg.ingest.base_url, cfg.ingest.token.clone())?;

    db::update_connection_flags(&pool, tenant, connection.is_alive, true).await?;

    let env = WorkflowEnv {
        pool: pool.clone(),
        pim: Arc::new(pim),
        ingest: Arc::new(ingest),
        log: Arc::new(DbLogSink::new(pool.clone())),
        data_sources: cfg.ingest.data_sources.clone(),
        tenant_id: tenant,
        channel_code: connection.channel.channel_code.clone(),
        category_tree: connection.channel.category_tree.clone(),
        run_kind: RunKind::Manual,
        policies: RetryPolicies::default(),
        media_concurrency: DEFAULT_MEDIA_CONCURRENCY,
    };

    let summary = sync::trigger(&env, &connection.provider_client_id).await?;
    info!(
        alive = summary.is_connection_alive,
        status = %summary.status,
        "synchronization run finished"
    );
    Ok(())
}
