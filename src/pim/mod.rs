use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt;
use tracing::warn;

use crate::model::SyncError;
use crate::pim::model::{
    AccessTokenResponse, AssetRecord, AttributeOptionRecord, AttributeRecord, CategoryRecord,
    ChannelRecord, Page, ProductRecord,
};

pub mod model;

const PAGE_LIMIT: u32 = 100;

/// Upstream PIM API surface consumed by the workflows. One implementation is
/// constructed per tenant connection; access tokens are passed per call so
/// the credential lease stays owned by the workflow.
#[async_trait]
pub trait PimService: Send + Sync {
    /// Resource-owner token grant. Returns the access token and its
    /// lifetime in seconds.
    async fn acquire_token(&self) -> Result<(String, i64), SyncError>;

    /// First page of categories under `category_tree`, optionally filtered
    /// to those updated after the last successful run.
    async fn fetch_categories(
        &self,
        token: &str,
        updated_after: Option<DateTime<Utc>>,
        category_tree: &str,
    ) -> Result<Page<CategoryRecord>, SyncError>;

    /// Follow an opaque next-page link for categories. The link is
    /// self-contained; no other filters apply.
    async fn fetch_category_page(
        &self,
        token: &str,
        next_url: &str,
    ) -> Result<Page<CategoryRecord>, SyncError>;

    /// Full (unfiltered by time) category list of a tree, used to resolve
    /// each product's channel category.
    async fn fetch_channel_categories(
        &self,
        token: &str,
        category_tree: &str,
    ) -> Result<Vec<CategoryRecord>, SyncError>;

    /// First page of products in `channel`, optionally filtered by update
    /// time.
    async fn fetch_products(
        &self,
        token: &str,
        channel: &str,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Page<ProductRecord>, SyncError>;

    /// Follow an opaque next-page link for products.
    async fn fetch_product_page(
        &self,
        token: &str,
        next_url: &str,
    ) -> Result<Page<ProductRecord>, SyncError>;

    /// Attribute metadata for the given codes (the codes present on the
    /// current page only).
    async fn fetch_attributes(
        &self,
        token: &str,
        codes: &[String],
    ) -> Result<Vec<AttributeRecord>, SyncError>;

    /// Options of one select-type attribute.
    async fn fetch_attribute_options(
        &self,
        token: &str,
        code: &str,
    ) -> Result<Vec<AttributeOptionRecord>, SyncError>;

    /// Channels configured on the PIM; used during connection preparation.
    async fn fetch_channels(&self, token: &str) -> Result<Vec<ChannelRecord>, SyncError>;

    /// Single asset of an asset family. `None` when the asset does not
    /// exist.
    async fn fetch_asset(
        &self,
        token: &str,
        family: &str,
        code: &str,
    ) -> Result<Option<AssetRecord>, SyncError>;

    /// Raw bytes of a media download link.
    async fn download_asset(&self, token: &str, url: &str) -> Result<Vec<u8>, SyncError>;
}

/// Reqwest-backed PIM client bound to one tenant's base URL and credentials.
#[derive(Clone)]
pub struct PimClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    /// Base64-encoded `client_id:client_secret` for the token endpoint.
    client_secret: String,
}

impl fmt::Debug for PimClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PimClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Search filter for the first category page: children of the tree root,
/// optionally updated since the last successful run.
pub fn category_search_filter(updated_after: Option<DateTime<Utc>>, category_tree: &str) -> String {
    let mut filter = serde_json::Map::new();
    filter.insert(
        "parent".to_string(),
        json!([{"operator": "=", "value": category_tree}]),
    );
    if let Some(since) = updated_after {
        filter.insert(
            "updated".to_string(),
            json!([{"operator": ">", "value": since.format("%Y-%m-%dT%H:%M:%SZ").to_string()}]),
        );
    }
    serde_json::Value::Object(filter).to_string()
}

/// Search filter for the first product page.
pub fn product_search_filter(updated_after: Option<DateTime<Utc>>) -> Option<String> {
    updated_after.map(|since| {
        json!({"updated": [{"operator": ">", "value": since.format("%Y-%m-%d %H:%M:%S").to_string()}]})
            .to_string()
    })
}

impl PimClient {
    pub fn new(
        pim_url: &str,
        username: String,
        password: String,
        client_secret: String,
    ) -> Result<Self, SyncError> {
        let base_url = Url::parse(pim_url)
            .map_err(|e| SyncError::Validation(format!("invalid PIM url: {e}")))?;
        let http = Client::builder()
            .user_agent("pim-sync/0.1")
            .build()
            .map_err(|e| SyncError::Unknown(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            username,
            password,
            client_secret,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::Validation(format!("invalid PIM endpoint: {e}")))
    }

    /// Map an upstream status to the error taxonomy. 401/403 mean the
    /// credentials themselves are bad and must not be retried.
    fn check_status(status: StatusCode) -> Result<(), SyncError> {
        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Unauthorized),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Err(SyncError::Validation(
                "validation error occurred on PIM side".to_string(),
            )),
            other => Err(SyncError::Unknown(format!(
                "PIM service does not indicate success: {other}"
            ))),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, token: &str) -> Result<T, SyncError> {
        let res = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::Unknown(format!("PIM request failed: {e}")))?;
        Self::check_status(res.status())?;
        res.json::<T>()
            .await
            .map_err(|e| SyncError::Unknown(format!("failed to parse PIM response: {e}")))
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        url: Url,
        token: &str,
    ) -> Result<Page<T>, SyncError> {
        self.get_json(url, token).await
    }

    /// Follow a self-contained next-page link verbatim.
    async fn get_next_page<T: DeserializeOwned>(
        &self,
        next_url: &str,
        token: &str,
    ) -> Result<Page<T>, SyncError> {
        let url = Url::parse(next_url)
            .map_err(|e| SyncError::Validation(format!("invalid next-page link: {e}")))?;
        self.get_page(url, token).await
    }
}

#[async_trait]
impl PimService for PimClient {
    async fn acquire_token(&self) -> Result<(String, i64), SyncError> {
        let url = self.endpoint("api/oauth/v1/token")?;
        let body = json!({
            "username": self.username,
            "password": self.password,
            "grant_type": "password",
        });
        let res = self
            .http
            .post(url)
            .header("Authorization", format!("Basic {}", self.client_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Unknown(format!("PIM token request failed: {e}")))?;
        Self::check_status(res.status())?;
        let token: AccessTokenResponse = res
            .json()
            .await
            .map_err(|e| SyncError::Unknown(format!("failed to parse token response: {e}")))?;
        Ok((token.access_token, token.expires_in))
    }

    async fn fetch_categories(
        &self,
        token: &str,
        updated_after: Option<DateTime<Utc>>,
        category_tree: &str,
    ) -> Result<Page<CategoryRecord>, SyncError> {
        let mut url = self.endpoint("api/rest/v1/categories")?;
        url.query_pairs_mut()
            .append_pair("limit", &PAGE_LIMIT.to_string())
            .append_pair("search", &category_search_filter(updated_after, category_tree));
        self.get_page(url, token).await
    }

    async fn fetch_category_page(
        &self,
        token: &str,
        next_url: &str,
    ) -> Result<Page<CategoryRecord>, SyncError> {
        self.get_next_page(next_url, token).await
    }

    async fn fetch_channel_categories(
        &self,
        token: &str,
        category_tree: &str,
    ) -> Result<Vec<CategoryRecord>, SyncError> {
        let mut url = self.endpoint("api/rest/v1/categories")?;
        url.query_pairs_mut()
            .append_pair("limit", &PAGE_LIMIT.to_string())
            .append_pair("search", &category_search_filter(None, category_tree));
        let page: Page<CategoryRecord> = self.get_page(url, token).await?;
        Ok(page.embedded.items)
    }

    async fn fetch_products(
        &self,
        token: &str,
        channel: &str,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Page<ProductRecord>, SyncError> {
        let mut url = self.endpoint("api/rest/v1/products")?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("limit", &PAGE_LIMIT.to_string())
                .append_pair("scope", channel);
            if let Some(search) = product_search_filter(updated_after) {
                q.append_pair("search", &search);
            }
        }
        self.get_page(url, token).await
    }

    async fn fetch_product_page(
        &self,
        token: &str,
        next_url: &str,
    ) -> Result<Page<ProductRecord>, SyncError> {
        self.get_next_page(next_url, token).await
    }

    async fn fetch_attributes(
        &self,
        token: &str,
        codes: &[String],
    ) -> Result<Vec<AttributeRecord>, SyncError> {
        let mut url = self.endpoint("api/rest/v1/attributes")?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("limit", &PAGE_LIMIT.to_string());
            if !codes.is_empty() {
                let search = json!({"code": [{"operator": "IN", "value": codes}]}).to_string();
                q.append_pair("search", &search);
            }
        }
        let page: Page<AttributeRecord> = self.get_page(url, token).await?;
        Ok(page.embedded.items)
    }

    async fn fetch_attribute_options(
        &self,
        token: &str,
        code: &str,
    ) -> Result<Vec<AttributeOptionRecord>, SyncError> {
        let mut url = self.endpoint(&format!("api/rest/v1/attributes/{code}/options"))?;
        url.query_pairs_mut()
            .append_pair("limit", &PAGE_LIMIT.to_string());
        let page: Page<AttributeOptionRecord> = self.get_page(url, token).await?;
        Ok(page.embedded.items)
    }

    async fn fetch_channels(&self, token: &str) -> Result<Vec<ChannelRecord>, SyncError> {
        let url = self.endpoint("api/rest/v1/channels")?;
        let page: Page<ChannelRecord> = self.get_page(url, token).await?;
        Ok(page.embedded.items)
    }

    async fn fetch_asset(
        &self,
        token: &str,
        family: &str,
        code: &str,
    ) -> Result<Option<AssetRecord>, SyncError> {
        let url = self.endpoint(&format!("api/rest/v1/asset-families/{family}/assets/{code}"))?;
        let res = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::Unknown(format!("PIM asset request failed: {e}")))?;
        if res.status() == StatusCode::NOT_FOUND {
            warn!(family, code, "asset referenced by product does not exist");
            return Ok(None);
        }
        Self::check_status(res.status())?;
        let asset = res
            .json::<AssetRecord>()
            .await
            .map_err(|e| SyncError::Unknown(format!("failed to parse asset response: {e}")))?;
        Ok(Some(asset))
    }

    async fn download_asset(&self, token: &str, url: &str) -> Result<Vec<u8>, SyncError> {
        let url = Url::parse(url)
            .map_err(|e| SyncError::Validation(format!("invalid download link: {e}")))?;
        let res = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::Unknown(format!("PIM download failed: {e}")))?;
        Self::check_status(res.status())?;
        let bytes = res
            .bytes()
            .await
            .map_err(|e| SyncError::Unknown(format!("failed to read download body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn category_filter_without_timestamp_only_scopes_parent() {
        let filter = category_search_filter(None, "master");
        let parsed: serde_json::Value = serde_json::from_str(&filter).unwrap();
        assert_eq!(parsed["parent"][0]["operator"], "=");
        assert_eq!(parsed["parent"][0]["value"], "master");
        assert!(parsed.get("updated").is_none());
    }

    #[test]
    fn category_filter_includes_last_sync_timestamp() {
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let filter = category_search_filter(Some(since), "master");
        let parsed: serde_json::Value = serde_json::from_str(&filter).unwrap();
        assert_eq!(parsed["updated"][0]["operator"], ">");
        assert_eq!(parsed["updated"][0]["value"], "2024-03-01T12:30:00Z");
    }

    #[test]
    fn product_filter_uses_space_separated_timestamp() {
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let filter = product_search_filter(Some(since)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&filter).unwrap();
        assert_eq!(parsed["updated"][0]["value"], "2024-03-01 12:30:00");
        assert!(product_search_filter(None).is_none());
    }

    #[test]
    fn status_mapping_follows_error_taxonomy() {
        assert!(PimClient::check_status(StatusCode::OK).is_ok());
        assert_eq!(
            PimClient::check_status(StatusCode::UNAUTHORIZED).unwrap_err(),
            SyncError::Unauthorized
        );
        assert_eq!(
            PimClient::check_status(StatusCode::FORBIDDEN).unwrap_err(),
            SyncError::Unauthorized
        );
        assert!(matches!(
            PimClient::check_status(StatusCode::BAD_REQUEST).unwrap_err(),
            SyncError::Validation(_)
        ));
        assert!(matches!(
            PimClient::check_status(StatusCode::INTERNAL_SERVER_ERROR).unwrap_err(),
            SyncError::Unknown(_)
        ));
    }
}
