//! Product import workflow.
//!
//! One step handles one product page: the page is fetched, attribute metadata
//! and the channel's category list are resolved for mapping, the mapped
//! entities are submitted, and the page's media requests fan out to bounded
//! concurrent media sub-workflows which are all joined before the step
//! completes. Product and media counts travel separately and produce
//! independent ledger entries.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};

use crate::db;
use crate::mapping::{self, AssetFamilySpec, AttributeKind, AttributeLookup, AttributeMeta};
use crate::model::{
    CredentialLease, Entity, FamilyMedia, MediaFetchRequest, PageCursor, Property, RetryContext,
    SourceKind, SyncDetail, SyncError,
};
use crate::pim::model::ProductRecord;
use crate::pim::PimService;
use crate::sync::{ensure_lease, internal, media, WorkflowEnv};

/// Serialized step input, checkpointed before every page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductSyncInput {
    pub updated_after: Option<DateTime<Utc>>,
    pub channel_code: String,
    pub cursor: PageCursor,
    pub products_ingested: i64,
    pub media_ingested: i64,
    pub retry: RetryContext,
}

impl ProductSyncInput {
    pub fn first_run(
        updated_after: Option<DateTime<Utc>>,
        channel_code: String,
        retry: RetryContext,
    ) -> Self {
        Self {
            updated_after,
            channel_code,
            cursor: PageCursor::start(),
            products_ingested: 0,
            media_ingested: 0,
            retry,
        }
    }
}

enum StepOutcome {
    Continue(ProductSyncInput),
    Retry(ProductSyncInput),
    Done((i64, i64)),
}

/// Everything one page produced, before accumulation into the input. The
/// media requests are still pending at this point; the step fans them out
/// once the page's products are in.
struct PageImport {
    products: i64,
    requests: Vec<MediaFetchRequest>,
    next: PageCursor,
}

/// Drive the workflow to completion. Returns the total product and media
/// counts.
#[instrument(skip_all, fields(tenant = %env.tenant_id))]
pub async fn run(
    env: &WorkflowEnv,
    root_instance: &str,
    initial: ProductSyncInput,
) -> Result<(i64, i64), SyncError> {
    let instance = format!("{root_instance}:products");
    let mut input = match db::load_checkpoint(&env.pool, &instance)
        .await
        .map_err(internal)?
    {
        Some(checkpoint) => {
            info!(instance = %instance, "resuming product import from checkpoint");
            serde_json::from_str(&checkpoint.state).map_err(internal)?
        }
        None => initial,
    };
    let mut lease: Option<CredentialLease> = None;

    loop {
        let state = serde_json::to_string(&input).map_err(internal)?;
        db::save_checkpoint(&env.pool, &instance, "products", &state)
            .await
            .map_err(internal)?;

        match step(env, &mut lease, input).await {
            Ok(StepOutcome::Continue(next)) => input = next,
            Ok(StepOutcome::Retry(next)) => {
                tokio::time::sleep(next.retry.attempt_delay()).await;
                input = next;
            }
            Ok(StepOutcome::Done((products, media))) => {
                db::clear_checkpoint(&env.pool, &instance)
                    .await
                    .map_err(internal)?;
                info!(products, media, "product import finished");
                return Ok((products, media));
            }
            Err(err) => {
                let _ = db::clear_checkpoint(&env.pool, &instance).await;
                return Err(err);
            }
        }
    }
}

async fn step(
    env: &WorkflowEnv,
    lease: &mut Option<CredentialLease>,
    input: ProductSyncInput,
) -> Result<StepOutcome, SyncError> {
    let token = match ensure_lease(env.pim.as_ref(), lease).await {
        Ok(token) => token,
        Err(err) => return fail_or_retry(env, input, err, 0, 0).await,
    };

    let page = match import_page(env, &token, &input).await {
        Ok(page) => page,
        Err(err) => return fail_or_retry(env, input, err, 0, 0).await,
    };

    // The page's products are submitted by now; from here on a failure must
    // still count them.
    let media_requests = page.requests.len() as i64;
    if let Err(err) = fan_out_media(env, &token, page.requests).await {
        return fail_or_retry(env, input, err, page.products, 0).await;
    }

    let products_ingested = input.products_ingested + page.products;
    let media_ingested = input.media_ingested + media_requests;
    if !page.next.is_start() {
        return Ok(StepOutcome::Continue(ProductSyncInput {
            cursor: page.next,
            products_ingested,
            media_ingested,
            ..input
        }));
    }

    // Drained. Products and media get independent ledger entries, each
    // suppressed when its count is zero.
    let mut details = Vec::new();
    if products_ingested > 0 {
        details.push(SyncDetail::now(
            products_ingested,
            SourceKind::Products,
            env.run_kind,
            true,
        ));
    }
    if media_ingested > 0 {
        details.push(SyncDetail::now(
            media_ingested,
            SourceKind::Media,
            env.run_kind,
            true,
        ));
    }
    if !details.is_empty() {
        if let Err(err) = db::append_sync_details(&env.pool, env.tenant_id, &details).await {
            return fail_or_retry(env, input, internal(err), page.products, media_requests).await;
        }
    }
    Ok(StepOutcome::Done((products_ingested, media_ingested)))
}

/// Fetch, map and submit one product page and resolve its media requests.
async fn import_page(
    env: &WorkflowEnv,
    token: &str,
    input: &ProductSyncInput,
) -> Result<PageImport, SyncError> {
    let page = match input.cursor.as_link() {
        Some(link) => env.pim.fetch_product_page(token, link).await?,
        None => {
            env.pim
                .fetch_products(token, &input.channel_code, input.updated_after)
                .await?
        }
    };
    let channel_categories = env
        .pim
        .fetch_channel_categories(token, &env.category_tree)
        .await?;
    let attributes = attribute_lookup(env.pim.as_ref(), token, page.items()).await?;

    let mut entities: Vec<Entity> = Vec::new();
    let mut requests: Vec<MediaFetchRequest> = Vec::new();
    for product in page.items() {
        let (entity, asset_codes) =
            mapping::map_product(product, &input.channel_code, &channel_categories, &attributes);
        if !asset_codes.is_empty() {
            let request =
                resolve_media_request(env, token, &entity, asset_codes).await?;
            if !request.is_empty() {
                requests.push(request);
            }
        }
        entities.push(entity);
    }

    if !entities.is_empty() {
        env.ingest
            .submit_entities(&env.data_sources.products, &entities)
            .await?;
    }

    Ok(PageImport {
        products: entities.len() as i64,
        requests,
        next: PageCursor::advance(page.next_link()),
    })
}

/// Attribute metadata for the codes present on this page. Options are only
/// fetched for select-type attributes, where codes must resolve to labels.
async fn attribute_lookup(
    pim: &dyn PimService,
    token: &str,
    items: &[ProductRecord],
) -> Result<AttributeLookup, SyncError> {
    let mut codes: Vec<String> = items
        .iter()
        .flat_map(|p| p.values.keys().cloned())
        .collect();
    codes.sort();
    codes.dedup();
    if codes.is_empty() {
        return Ok(AttributeLookup::new());
    }

    let mut lookup = AttributeLookup::new();
    for record in pim.fetch_attributes(token, &codes).await? {
        let kind = AttributeKind::from_pim_type(&record.kind);
        let options = if kind.is_select() {
            pim.fetch_attribute_options(token, &record.code).await?
        } else {
            Vec::new()
        };
        lookup.insert(record.code, AttributeMeta { kind, options });
    }
    Ok(lookup)
}

/// Resolve the asset codes a product references into download URLs and the
/// product-level properties each family carries onto its media entities.
/// Assets missing upstream are skipped.
async fn resolve_media_request(
    env: &WorkflowEnv,
    token: &str,
    entity: &Entity,
    asset_codes: BTreeMap<String, Vec<String>>,
) -> Result<MediaFetchRequest, SyncError> {
    let mut families = BTreeMap::new();
    for (family, codes) in asset_codes {
        let carried_properties: Vec<Property> = AssetFamilySpec::for_family(&family)
            .map(|spec| {
                entity
                    .properties
                    .iter()
                    .filter(|p| spec.carried_properties.contains(&p.id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut urls = Vec::new();
        for code in &codes {
            if let Some(asset) = env.pim.fetch_asset(token, &family, code).await? {
                if let Some(url) = asset.download_url() {
                    urls.push(url.to_string());
                }
            }
        }
        families.insert(
            family,
            FamilyMedia {
                urls,
                carried_properties,
            },
        );
    }
    Ok(MediaFetchRequest {
        product_key: entity.key.clone(),
        families,
    })
}

/// Run the page's media sub-workflows with bounded concurrency and join them
/// all. Denied access wins over other failures when combining results.
async fn fan_out_media(
    env: &WorkflowEnv,
    token: &str,
    requests: Vec<MediaFetchRequest>,
) -> Result<(), SyncError> {
    if requests.is_empty() {
        return Ok(());
    }
    let results: Vec<Result<(), SyncError>> = stream::iter(requests)
        .map(|request| {
            let env = env.clone();
            let token = token.to_string();
            async move { media::run(&env, &token, request).await }
        })
        .buffer_unordered(env.media_concurrency.max(1))
        .collect()
        .await;

    let mut first_err = None;
    for result in results {
        if let Err(err) = result {
            if err.is_unauthorized() {
                return Err(err);
            }
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Same shape as the category workflow's failure handling, with one failed
/// ledger entry per source on exhaustion. The per-step counts cover whatever
/// the failing step had already ingested, so a failure after the page's
/// product submission still counts those products.
async fn fail_or_retry(
    env: &WorkflowEnv,
    input: ProductSyncInput,
    err: SyncError,
    products_this_step: i64,
    media_this_step: i64,
) -> Result<StepOutcome, SyncError> {
    if err.is_unauthorized() {
        error!("product import stopped: access to PIM denied");
        return Err(err);
    }
    if input.retry.should_retry() {
        let retry = input.retry.next_attempt();
        warn!(
            %err,
            attempt = retry.current_attempt,
            max = retry.max_attempts,
            "product page failed"
        );
        return Ok(StepOutcome::Retry(ProductSyncInput { retry, ..input }));
    }

    error!(%err, attempts = input.retry.max_attempts, "product import failed");
    let details = [
        SyncDetail::now(
            input.products_ingested + products_this_step,
            SourceKind::Products,
            env.run_kind,
            false,
        ),
        SyncDetail::now(
            input.media_ingested + media_this_step,
            SourceKind::Media,
            env.run_kind,
            false,
        ),
    ];
    if let Err(save_err) = db::append_sync_details(&env.pool, env.tenant_id, &details).await {
        warn!(?save_err, "could not record failed product run");
    }
    Err(err)
}
