//! Category import workflow.
//!
//! Walks the category pages of the tenant's tree, maps each record to a flat
//! entity and submits the page to the ingestion service. One step handles one
//! page; the cumulative count and cursor travel in the serialized input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::db;
use crate::mapping;
use crate::model::{
    CredentialLease, Entity, PageCursor, RetryContext, SourceKind, SyncDetail, SyncError,
};
use crate::sync::{ensure_lease, internal, WorkflowEnv};

/// Serialized step input. A resumed process picks the import back up at the
/// cursor with the counts accumulated so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategorySyncInput {
    pub updated_after: Option<DateTime<Utc>>,
    pub category_tree: String,
    pub cursor: PageCursor,
    pub ingested: i64,
    pub retry: RetryContext,
}

impl CategorySyncInput {
    pub fn first_run(
        updated_after: Option<DateTime<Utc>>,
        category_tree: String,
        retry: RetryContext,
    ) -> Self {
        Self {
            updated_after,
            category_tree,
            cursor: PageCursor::start(),
            ingested: 0,
            retry,
        }
    }
}

enum StepOutcome {
    Continue(CategorySyncInput),
    Retry(CategorySyncInput),
    Done(i64),
}

/// Drive the workflow to completion, checkpointing the input before each
/// step. Returns the total number of ingested categories.
#[instrument(skip_all, fields(tenant = %env.tenant_id))]
pub async fn run(
    env: &WorkflowEnv,
    root_instance: &str,
    initial: CategorySyncInput,
) -> Result<i64, SyncError> {
    let instance = format!("{root_instance}:categories");
    let mut input = match db::load_checkpoint(&env.pool, &instance)
        .await
        .map_err(internal)?
    {
        Some(checkpoint) => {
            info!(instance = %instance, "resuming category import from checkpoint");
            serde_json::from_str(&checkpoint.state).map_err(internal)?
        }
        None => initial,
    };
    let mut lease: Option<CredentialLease> = None;

    loop {
        let state = serde_json::to_string(&input).map_err(internal)?;
        db::save_checkpoint(&env.pool, &instance, "categories", &state)
            .await
            .map_err(internal)?;

        match step(env, &mut lease, input).await {
            Ok(StepOutcome::Continue(next)) => input = next,
            Ok(StepOutcome::Retry(next)) => {
                tokio::time::sleep(next.retry.attempt_delay()).await;
                input = next;
            }
            Ok(StepOutcome::Done(count)) => {
                db::clear_checkpoint(&env.pool, &instance)
                    .await
                    .map_err(internal)?;
                info!(count, "category import finished");
                return Ok(count);
            }
            Err(err) => {
                let _ = db::clear_checkpoint(&env.pool, &instance).await;
                return Err(err);
            }
        }
    }
}

/// One step: refresh the lease, fetch one page (first page from filters,
/// later pages from the self-contained cursor link), map and submit it.
async fn step(
    env: &WorkflowEnv,
    lease: &mut Option<CredentialLease>,
    input: CategorySyncInput,
) -> Result<StepOutcome, SyncError> {
    let token = match ensure_lease(env.pim.as_ref(), lease).await {
        Ok(token) => token,
        Err(err) => return fail_or_retry(env, input, err, 0).await,
    };

    let page = match input.cursor.as_link() {
        Some(link) => env.pim.fetch_category_page(&token, link).await,
        None => {
            env.pim
                .fetch_categories(&token, input.updated_after, &input.category_tree)
                .await
        }
    };
    let page = match page {
        Ok(page) => page,
        Err(err) => return fail_or_retry(env, input, err, 0).await,
    };

    let entities: Vec<Entity> = page.items().iter().map(mapping::map_category).collect();
    if !entities.is_empty() {
        if let Err(err) = env
            .ingest
            .submit_entities(&env.data_sources.categories, &entities)
            .await
        {
            return fail_or_retry(env, input, err, 0).await;
        }
    }

    let ingested = input.ingested + entities.len() as i64;
    let next = PageCursor::advance(page.next_link());
    if !next.is_start() {
        return Ok(StepOutcome::Continue(CategorySyncInput {
            cursor: next,
            ingested,
            ..input
        }));
    }

    // Drained. A run that ingested nothing leaves no ledger entry, so the
    // next run's filter timestamp stays put.
    if ingested > 0 {
        let detail = SyncDetail::now(ingested, SourceKind::Categories, env.run_kind, true);
        if let Err(err) = db::append_sync_details(&env.pool, env.tenant_id, &[detail]).await {
            // The page itself is already ingested at this point; the failed
            // entry must count it.
            let in_run = entities.len() as i64;
            return fail_or_retry(env, input, internal(err), in_run).await;
        }
    }
    Ok(StepOutcome::Done(ingested))
}

/// Authorization failures stop the workflow at once. Anything else re-enters
/// the same input within the retry budget; exhaustion records a failed ledger
/// entry with the prior accumulation plus whatever this step had already
/// ingested before the failure.
async fn fail_or_retry(
    env: &WorkflowEnv,
    input: CategorySyncInput,
    err: SyncError,
    ingested_this_step: i64,
) -> Result<StepOutcome, SyncError> {
    if err.is_unauthorized() {
        error!("category import stopped: access to PIM denied");
        return Err(err);
    }
    if input.retry.should_retry() {
        let retry = input.retry.next_attempt();
        warn!(
            %err,
            attempt = retry.current_attempt,
            max = retry.max_attempts,
            "category page failed"
        );
        return Ok(StepOutcome::Retry(CategorySyncInput { retry, ..input }));
    }

    error!(%err, attempts = input.retry.max_attempts, "category import failed");
    let detail = SyncDetail::now(
        input.ingested + ingested_this_step,
        SourceKind::Categories,
        env.run_kind,
        false,
    );
    if let Err(save_err) = db::append_sync_details(&env.pool, env.tenant_id, &[detail]).await {
        warn!(?save_err, "could not record failed category run");
    }
    Err(err)
}
