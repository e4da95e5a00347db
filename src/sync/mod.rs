//! Durable synchronization workflows.
//!
//! Each workflow is a state machine stepped by a driver loop: a step consumes
//! an immutable, serializable input and either finishes or produces the next
//! input (cursor + cumulative counters + retry state) to continue with. The
//! driver persists the input to the `checkpoints` table before every step and
//! deletes it on terminal completion, so a restarted process resumes from the
//! last committed page boundary instead of from scratch, and in-process state
//! stays bounded regardless of catalog size.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::DataSources;
use crate::db::{self, Pool};
use crate::ingest::IngestService;
use crate::logsink::LogSink;
use crate::model::{CredentialLease, RetryContext, RunKind, SyncError};
use crate::pim::PimService;

pub mod categories;
pub mod media;
pub mod products;

/// Upper bound on media sub-workflows running at once per product page.
pub const DEFAULT_MEDIA_CONCURRENCY: usize = 4;

/// Per-stage retry budgets. Defaults are the production values; tests inject
/// zero-delay budgets.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicies {
    pub categories: RetryContext,
    pub products: RetryContext,
    pub coordinator: RetryContext,
    pub media: RetryContext,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            categories: RetryContext::empty(2, Duration::from_secs(20)),
            products: RetryContext::empty(3, Duration::from_secs(25)),
            coordinator: RetryContext::empty(5, Duration::from_secs(30)),
            media: RetryContext::empty(2, Duration::from_secs(10)),
        }
    }
}

/// Everything one tenant's run needs: collaborators, data source routing and
/// the tenant's channel configuration.
#[derive(Clone)]
pub struct WorkflowEnv {
    pub pool: Pool,
    pub pim: Arc<dyn PimService>,
    pub ingest: Arc<dyn IngestService>,
    pub log: Arc<dyn LogSink>,
    pub data_sources: DataSources,
    pub tenant_id: Uuid,
    pub channel_code: String,
    pub category_tree: String,
    pub run_kind: RunKind,
    pub policies: RetryPolicies,
    /// Upper bound on concurrently running media sub-workflows.
    pub media_concurrency: usize,
}

/// Deterministic orchestration instance id. Exactly one active run per
/// `(tenant, provider client)` pair: a duplicate trigger resolves to the same
/// id and attaches to the live instance instead of starting a second one.
pub fn instance_id(tenant_id: Uuid, provider_client_id: &str) -> String {
    format!("data-sync-{tenant_id}-{provider_client_id}")
}

/// Infrastructure failures (checkpoint writes, serialization) enter the
/// taxonomy as unknown: retryable, and never confused with denied access.
pub(crate) fn internal(err: impl std::fmt::Display) -> SyncError {
    SyncError::Unknown(err.to_string())
}

/// Refresh the stage's credential lease if absent or stale and return the
/// access token. A fresh lease is reused as-is, so it is never refreshed
/// twice within one stage invocation.
pub(crate) async fn ensure_lease(
    pim: &dyn PimService,
    lease: &mut Option<CredentialLease>,
) -> Result<String, SyncError> {
    let now = Utc::now();
    if let Some(current) = lease.as_ref() {
        if !current.is_stale(now) {
            return Ok(current.access_token.clone());
        }
    }
    let (access_token, expires_in) = pim.acquire_token().await?;
    let fresh = CredentialLease::new(access_token, expires_in, now);
    let token = fresh.access_token.clone();
    *lease = Some(fresh);
    Ok(token)
}

/// Serialized coordinator state carried across its own continue-as-new
/// steps. `synchronization_complete` lets a resumed coordinator skip straight
/// to the flag finalization it was retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorInput {
    pub retry: RetryContext,
    pub synchronization_complete: bool,
    pub is_alive: bool,
}

impl CoordinatorInput {
    pub fn new(retry: RetryContext) -> Self {
        Self {
            retry,
            synchronization_complete: false,
            is_alive: true,
        }
    }
}

/// Final outcome of one coordinator run. A run never panics the host: all
/// failure shapes resolve to a status string plus whatever the ledger
/// recorded along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub is_connection_alive: bool,
    pub status: String,
}

/// Trigger a synchronization run for the tenant. Resumes the live instance
/// when a checkpoint for the deterministic instance id already exists.
pub async fn trigger(env: &WorkflowEnv, provider_client_id: &str) -> Result<RunSummary> {
    let instance = instance_id(env.tenant_id, provider_client_id);
    let input = match db::load_checkpoint(&env.pool, &instance).await? {
        Some(checkpoint) => {
            info!(instance = %instance, "resuming live synchronization instance");
            serde_json::from_str(&checkpoint.state)?
        }
        None => CoordinatorInput::new(env.policies.coordinator),
    };
    run_coordinator(env, &instance, input).await
}

/// Top-level workflow: run category and product synchronization concurrently,
/// combine their outcomes into the connection-alive flag, then finalize the
/// connection's flags with the coordinator's own retry budget.
#[instrument(skip_all, fields(tenant = %env.tenant_id))]
pub async fn run_coordinator(
    env: &WorkflowEnv,
    instance: &str,
    mut input: CoordinatorInput,
) -> Result<RunSummary> {
    loop {
        db::save_checkpoint(
            &env.pool,
            instance,
            "coordinator",
            &serde_json::to_string(&input)?,
        )
        .await?;

        if !input.synchronization_complete {
            input.is_alive = perform_synchronization(env, instance).await?;
            input.synchronization_complete = true;
            // Persist before finalizing so a crash during the flag update
            // does not re-run the import workflows.
            db::save_checkpoint(
                &env.pool,
                instance,
                "coordinator",
                &serde_json::to_string(&input)?,
            )
            .await?;
        }

        match db::update_connection_flags(&env.pool, env.tenant_id, input.is_alive, false).await {
            Ok(()) => {
                db::clear_checkpoint(&env.pool, instance).await?;
                return Ok(RunSummary {
                    is_connection_alive: input.is_alive,
                    status: format!("Synchronization completed for tenant: {}", env.tenant_id),
                });
            }
            Err(err) if input.retry.should_retry() => {
                error!(?err, "connection flags update failed; retrying");
                tokio::time::sleep(input.retry.attempt_delay()).await;
                input.retry = input.retry.next_attempt();
            }
            Err(err) => {
                error!(?err, tenant = %env.tenant_id, "connection flags update failed");
                env.log
                    .record(
                        &format!("connection flags update failed: {err}"),
                        "CoordinatorError",
                        &format!("tenant: {}", env.tenant_id),
                    )
                    .await;
                db::clear_checkpoint(&env.pool, instance).await?;
                return Ok(RunSummary {
                    is_connection_alive: input.is_alive,
                    status: format!(
                        "Connection flags update failed for tenant: {}",
                        env.tenant_id
                    ),
                });
            }
        }
    }
}

/// Run both import workflows to completion and derive the liveness flag.
/// The connection is considered dead only when the combined failure reason is
/// that the PIM denied authorization — any other failure leaves it alive.
async fn perform_synchronization(env: &WorkflowEnv, instance: &str) -> Result<bool> {
    let last_categories =
        db::last_successful_sync(&env.pool, env.tenant_id, crate::model::SourceKind::Categories)
            .await?;
    let last_products =
        db::last_successful_sync(&env.pool, env.tenant_id, crate::model::SourceKind::Products)
            .await?;

    let categories_input = categories::CategorySyncInput::first_run(
        last_categories,
        env.category_tree.clone(),
        env.policies.categories,
    );
    let products_input = products::ProductSyncInput::first_run(
        last_products,
        env.channel_code.clone(),
        env.policies.products,
    );

    let (category_result, product_result) = tokio::join!(
        categories::run(env, instance, categories_input),
        products::run(env, instance, products_input),
    );

    let mut unauthorized = false;
    if let Err(err) = &category_result {
        error!(tenant = %env.tenant_id, %err, "category synchronization failed");
        unauthorized |= err.is_unauthorized();
    }
    if let Err(err) = &product_result {
        error!(tenant = %env.tenant_id, %err, "product synchronization failed");
        unauthorized |= err.is_unauthorized();
    }

    Ok(!unauthorized)
}
