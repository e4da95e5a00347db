//! Media import sub-workflow, one instance per product.
//!
//! For every download URL of every asset family the file is resolved against
//! the ingestion service: an already-ingested file (matched by its stable
//! unique id `{family}_{fileName}`) is reused, otherwise the bytes are pulled
//! from the PIM and uploaded. Failures of a single file are recorded to the
//! log sink and absorbed; the product keeps its remaining media.

use tracing::{error, instrument, warn};

use crate::ingest::model::{MediaFile, UploadMetadata};
use crate::ingest::mime_from_filename;
use crate::mapping;
use crate::model::{Entity, MediaFetchRequest, Property, SyncError};
use crate::sync::WorkflowEnv;

/// Run the sub-workflow within the media retry budget. Only submit failures
/// and denied access escape `import_media`; per-file failures never do.
#[instrument(skip_all, fields(product = %request.product_key))]
pub(crate) async fn run(
    env: &WorkflowEnv,
    token: &str,
    request: MediaFetchRequest,
) -> Result<(), SyncError> {
    let mut retry = env.policies.media;
    loop {
        match import_media(env, token, &request).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_unauthorized() => return Err(err),
            Err(err) if retry.should_retry() => {
                retry = retry.next_attempt();
                warn!(
                    %err,
                    attempt = retry.current_attempt,
                    max = retry.max_attempts,
                    "media import failed"
                );
                tokio::time::sleep(retry.attempt_delay()).await;
            }
            Err(err) => {
                error!(%err, attempts = retry.max_attempts, "media import exhausted retries");
                return Err(err);
            }
        }
    }
}

async fn import_media(
    env: &WorkflowEnv,
    token: &str,
    request: &MediaFetchRequest,
) -> Result<(), SyncError> {
    let mut media_entities: Vec<Entity> = Vec::new();
    let mut resolved_any = false;
    let mut thumbnail: Option<String> = None;

    for (family, media) in &request.families {
        let mut family_first: Option<String> = None;
        for url in &media.urls {
            let file_name = file_name_from_url(url);
            let unique_id = format!("{family}_{file_name}");
            match resolve_file(env, token, url, &file_name, &unique_id).await {
                Ok(file) => {
                    if family_first.is_none() {
                        family_first = Some(file.public_url.clone());
                    }
                    let properties = mapping::map_media_properties(
                        &file,
                        &unique_id,
                        family,
                        &media.carried_properties,
                    );
                    media_entities.push(Entity::upsert(unique_id, properties));
                    resolved_any = true;
                }
                Err(err) if err.is_unauthorized() => return Err(err),
                Err(err) => {
                    warn!(%err, url, "media file skipped");
                    env.log
                        .record(
                            &format!("failed to onboard media file: {err}"),
                            "MediaImportError",
                            &format!("product: {}, url: {url}", request.product_key),
                        )
                        .await;
                }
            }
        }
        // The product thumbnail comes from the packshot family's first file.
        if family == mapping::THUMBNAIL_FAMILY {
            if let Some(public_url) = family_first {
                thumbnail = Some(mapping::thumbnail_url(&public_url));
            }
        }
    }

    if !media_entities.is_empty() {
        env.ingest
            .submit_entities(&env.data_sources.media, &media_entities)
            .await?;
    }

    // Cross-link the product to its media. The link goes one way: the media
    // entities never point back at the product.
    if resolved_any {
        let ids = media_entities
            .iter()
            .map(|e| e.key.as_str())
            .collect::<Vec<_>>()
            .join("|");
        let mut properties = vec![Property::new("media", ids)];
        if let Some(thumbnail) = thumbnail {
            properties.push(Property::new("thumbnail", thumbnail));
        }
        let link = Entity::upsert(request.product_key.clone(), properties);
        env.ingest
            .submit_entities(&env.data_sources.products, &[link])
            .await?;
    }
    Ok(())
}

/// Reuse an already-ingested file or download-and-upload a new one.
async fn resolve_file(
    env: &WorkflowEnv,
    token: &str,
    url: &str,
    file_name: &str,
    unique_id: &str,
) -> Result<MediaFile, SyncError> {
    if let Some(existing) = env.ingest.asset_by_unique_id(unique_id).await? {
        return Ok(existing);
    }
    let bytes = env.pim.download_asset(token, url).await?;
    let metadata = UploadMetadata {
        filename: file_name.to_string(),
        mime_type: mime_from_filename(file_name).to_string(),
        size: bytes.len() as u64,
        unique_id: unique_id.to_string(),
    };
    env.ingest.upload_asset(bytes, metadata).await
}

/// Last path segment of a download link, without query or fragment.
fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}
