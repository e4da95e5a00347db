//! Field mapping from PIM records to flat ingestion entities.
//!
//! Attribute values are interpreted through a closed set of attribute kinds
//! resolved once per page from the attribute metadata endpoint; the raw
//! `data` payload shape depends on the kind.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::ingest::model::MediaFile;
use crate::model::{Entity, Property};
use crate::pim::model::{AttributeOptionRecord, CategoryRecord, ProductRecord};

/// Closed tagged set of attribute kinds; everything unrecognized maps as
/// `Default` (raw value with its locale).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Select,
    Multiselect,
    FileCollection,
    Metric,
    Default,
}

impl AttributeKind {
    pub fn from_pim_type(pim_type: &str) -> Self {
        match pim_type {
            "pim_catalog_simpleselect" => AttributeKind::Select,
            "pim_catalog_multiselect" => AttributeKind::Multiselect,
            "pim_catalog_asset_collection" => AttributeKind::FileCollection,
            "pim_catalog_metric" => AttributeKind::Metric,
            _ => AttributeKind::Default,
        }
    }

    pub fn is_select(self) -> bool {
        matches!(self, AttributeKind::Select | AttributeKind::Multiselect)
    }
}

/// Attribute metadata resolved for one page: its kind, plus option labels for
/// select-type attributes.
#[derive(Debug, Clone, Default)]
pub struct AttributeMeta {
    pub kind: AttributeKind,
    pub options: Vec<AttributeOptionRecord>,
}

impl Default for AttributeKind {
    fn default() -> Self {
        AttributeKind::Default
    }
}

pub type AttributeLookup = BTreeMap<String, AttributeMeta>;

/// Asset-collection attributes, the asset family each feeds, and the
/// product-level properties carried onto that family's media entities.
pub const ASSET_FAMILIES: &[AssetFamilySpec] = &[
    AssetFamilySpec {
        attribute_code: "packshots",
        family: "variant_packshots",
        carried_properties: &[
            "brand",
            "ecommerce_category",
            "generic_colour",
            "matStruct02",
            "matStruct03",
            "season",
            "sexe",
        ],
    },
    AssetFamilySpec {
        attribute_code: "detailshots",
        family: "detailshots",
        carried_properties: &[
            "brand",
            "ecommerce_category",
            "generic_colour",
            "matStruct02",
            "matStruct03",
            "season",
            "sexe",
        ],
    },
    AssetFamilySpec {
        attribute_code: "actionshots",
        family: "actionshots",
        carried_properties: &[
            "brand",
            "ecommerce_category",
            "matStruct02",
            "matStruct03",
            "season",
            "sexe",
        ],
    },
];

/// The family whose first resolved asset supplies the product thumbnail.
pub const THUMBNAIL_FAMILY: &str = "variant_packshots";

#[derive(Debug, Clone, Copy)]
pub struct AssetFamilySpec {
    pub attribute_code: &'static str,
    pub family: &'static str,
    pub carried_properties: &'static [&'static str],
}

impl AssetFamilySpec {
    pub fn for_attribute(code: &str) -> Option<&'static AssetFamilySpec> {
        ASSET_FAMILIES.iter().find(|s| s.attribute_code == code)
    }

    pub fn for_family(family: &str) -> Option<&'static AssetFamilySpec> {
        ASSET_FAMILIES.iter().find(|s| s.family == family)
    }
}

/// Map one category record to a flat entity: one localized `Labels` property
/// per locale, plus parent and update time.
pub fn map_category(category: &CategoryRecord) -> Entity {
    let mut properties: Vec<Property> = category
        .labels
        .iter()
        .map(|(locale, label)| Property::localized("Labels", label.clone(), locale.clone()))
        .collect();
    properties.push(Property::new(
        "Parent",
        category.parent.clone().unwrap_or_default(),
    ));
    properties.push(Property::new("Updated", category.updated.clone()));
    Entity::upsert(category.code.clone(), properties)
}

/// Map one product to a flat entity plus the asset codes it references,
/// grouped per asset family.
pub fn map_product(
    product: &ProductRecord,
    channel_code: &str,
    channel_categories: &[CategoryRecord],
    attributes: &AttributeLookup,
) -> (Entity, BTreeMap<String, Vec<String>>) {
    let mut properties = vec![
        Property::new("Code", product.identifier.clone()),
        Property::new("Parent", product.parent.clone().unwrap_or_default()),
    ];
    let mut asset_codes: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (code, values) in &product.values {
        let meta = attributes.get(code).cloned().unwrap_or_default();
        for value in values {
            match meta.kind {
                kind if kind.is_select() => {
                    properties.extend(map_select_value(&value.data, &meta.options, code));
                }
                AttributeKind::FileCollection => {
                    if let Some(spec) = AssetFamilySpec::for_attribute(code) {
                        if let Value::Array(codes) = &value.data {
                            asset_codes
                                .entry(spec.family.to_string())
                                .or_default()
                                .extend(codes.iter().map(stringify_scalar));
                        }
                    }
                }
                AttributeKind::Metric => {
                    properties.push(Property::new(
                        format!("{code}_amount"),
                        stringify_scalar(&value.data["amount"]),
                    ));
                    properties.push(Property::new(
                        format!("{code}_unit"),
                        stringify_scalar(&value.data["unit"]),
                    ));
                }
                _ => {
                    properties.push(map_default_value(&value.data, value.locale.clone(), code));
                }
            }
        }
    }

    // Channel category: the last tree category the product belongs to.
    let mut category = String::new();
    for channel_category in channel_categories {
        if product.categories.iter().any(|c| c == &channel_category.code) {
            category = channel_category.code.clone();
        }
    }
    properties.push(Property::new(format!("{channel_code}_category"), category));

    (
        Entity::upsert(product.identifier.clone(), properties),
        asset_codes,
    )
}

/// Select and multiselect values resolve option codes to labels, grouped per
/// locale and joined with `|`.
fn map_select_value(
    data: &Value,
    options: &[AttributeOptionRecord],
    attribute_code: &str,
) -> Vec<Property> {
    let codes: Vec<String> = match data {
        Value::Array(items) => items.iter().map(stringify_scalar).collect(),
        other => vec![stringify_scalar(other)],
    };

    let mut per_locale: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for option in options.iter().filter(|o| codes.contains(&o.code)) {
        for (locale, label) in &option.labels {
            per_locale
                .entry(locale.clone())
                .or_default()
                .push(label.clone());
        }
    }

    per_locale
        .into_iter()
        .map(|(locale, labels)| Property::localized(attribute_code, labels.join("|"), locale))
        .collect()
}

/// Default values carry the raw data: arrays joined with `|`, objects as
/// JSON, scalars verbatim.
fn map_default_value(data: &Value, locale: Option<String>, attribute_code: &str) -> Property {
    let value = match data {
        Value::Array(items) => items
            .iter()
            .map(stringify_scalar)
            .collect::<Vec<_>>()
            .join("|"),
        Value::Object(_) => data.to_string(),
        other => stringify_scalar(other),
    };
    Property {
        id: attribute_code.to_string(),
        value,
        language: locale,
    }
}

fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Derived thumbnail link for an ingested media file.
pub fn thumbnail_url(public_url: &str) -> String {
    format!("{public_url}?impolicy=small")
}

/// Properties of one media entity: file facts, derived thumbnail, asset
/// family, image dimensions when present, then the carried product-level
/// properties.
pub fn map_media_properties(
    file: &MediaFile,
    unique_id: &str,
    asset_family: &str,
    carried: &[Property],
) -> Vec<Property> {
    let mut properties = vec![
        Property::new("fileId", file.id.clone()),
        Property::new("uniqueId", unique_id),
        Property::new("fileName", file.metadata.filename.clone()),
        Property::new("mimeType", file.metadata.mime_type.clone()),
        Property::new("fileSize", file.metadata.size.to_string()),
        Property::new("containerName", file.location.container_name.clone()),
        Property::new("url", file.public_url.clone()),
        Property::new("thumbnail", thumbnail_url(&file.public_url)),
        Property::new("assetType", asset_family),
    ];

    if let Some(image) = file
        .metadata
        .media_info
        .as_ref()
        .and_then(|info| info.image.as_ref())
    {
        properties.push(Property::new("height", image.height.to_string()));
        properties.push(Property::new("width", image.width.to_string()));
        if let Some(resolution) = &image.resolution {
            properties.push(Property::new(
                "horizontalResolution",
                resolution.horizontal.to_string(),
            ));
            properties.push(Property::new(
                "verticalResolution",
                resolution.vertical.to_string(),
            ));
        }
    }

    properties.extend(carried.iter().cloned());
    properties
}
