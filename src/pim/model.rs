//! Wire DTOs for the upstream PIM REST API.
//!
//! Paged endpoints share the HAL-style envelope: items under
//! `_embedded.items`, the self-contained next-page link under
//! `_links.next.href`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Embedded<T> {
    pub items: Vec<T>,
}

/// Paged response envelope shared by categories, products, attributes,
/// attribute options and channels.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(rename = "_links", default)]
    pub links: PageLinks,
    #[serde(rename = "_embedded")]
    pub embedded: Embedded<T>,
}

impl<T> Page<T> {
    pub fn items(&self) -> &[T] {
        &self.embedded.items
    }

    pub fn next_link(&self) -> Option<String> {
        self.links.next.as_ref().map(|l| l.href.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRecord {
    pub code: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One attribute value cell on a product: the raw `data` payload is shaped by
/// the attribute's kind and interpreted by the mapping layer.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeValue {
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductRecord {
    pub identifier: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub values: BTreeMap<String, Vec<AttributeValue>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeRecord {
    pub code: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeOptionRecord {
    pub code: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRecord {
    pub code: String,
    pub category_tree: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetMediaLinks {
    #[serde(default)]
    pub download: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetMediaValue {
    #[serde(rename = "_links", default)]
    pub links: AssetMediaLinks,
    /// File name of the stored media value.
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetValues {
    #[serde(default)]
    pub media: Vec<AssetMediaValue>,
}

/// Single asset of an asset family.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetRecord {
    #[serde(rename = "values", default)]
    pub values: AssetValues,
}

impl AssetRecord {
    /// Download URL of the first media value, if any.
    pub fn download_url(&self) -> Option<&str> {
        self.values
            .media
            .first()
            .and_then(|m| m.links.download.as_ref())
            .map(|l| l.href.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_envelope_parses_hal_shape() {
        let raw = r#"{
            "_links": {"next": {"href": "https://pim/api/rest/v1/categories?page=2"}},
            "_embedded": {"items": [
                {"code": "shoes", "parent": "master", "updated": "2024-01-01T00:00:00Z",
                 "labels": {"en_US": "Shoes", "sv_SE": "Skor"}}
            ]}
        }"#;
        let page: Page<CategoryRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(page.items().len(), 1);
        assert_eq!(page.items()[0].code, "shoes");
        assert_eq!(
            page.next_link().as_deref(),
            Some("https://pim/api/rest/v1/categories?page=2")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let raw = r#"{"_embedded": {"items": []}}"#;
        let page: Page<CategoryRecord> = serde_json::from_str(raw).unwrap();
        assert!(page.next_link().is_none());
    }

    #[test]
    fn asset_download_url_resolves_first_media() {
        let raw = r#"{
            "values": {"media": [
                {"_links": {"download": {"href": "https://pim/media/a.jpg"}}, "data": "a.jpg"}
            ]}
        }"#;
        let asset: AssetRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(asset.download_url(), Some("https://pim/media/a.jpg"));

        let empty: AssetRecord = serde_json::from_str(r#"{"values": {"media": []}}"#).unwrap();
        assert!(empty.download_url().is_none());
    }
}
