// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Data models for catalog products, projected feed items and API payloads.
//!
//! Products are read-only snapshots handed over by a [`crate::catalog::ProductCatalog`].
//! A [`FeedItem`] is the flattened unit that becomes one `<item>` in the feed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    #[default]
    Simple,
    Variable,
    Variation,
    Grouped,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Publish,
    Draft,
    Pending,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockStatus {
    #[default]
    InStock,
    OutOfStock,
    OnBackorder,
}

impl StockStatus {
    pub fn is_in_stock(self) -> bool {
        // Backorders remain purchasable.
        !matches!(self, StockStatus::OutOfStock)
    }

    pub fn availability(self) -> &'static str {
        match self {
            StockStatus::InStock => "in stock",
            StockStatus::OnBackorder => "preorder",
            StockStatus::OutOfStock => "out of stock",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogVisibility {
    #[default]
    Visible,
    Catalog,
    Search,
    Hidden,
}

impl CatalogVisibility {
    /// Products that do not show up in the shop listing.
    pub fn is_excluded_from_catalog(self) -> bool {
        matches!(self, CatalogVisibility::Search | CatalogVisibility::Hidden)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
}

/// An attachment reference. `url` is `None` when the attachment no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: u64,
    #[serde(default)]
    pub url: Option<String>,
}

/// One attribute value selected by a variation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationAttribute {
    /// Attribute taxonomy, e.g. `pa_color`.
    pub taxonomy: String,
    /// URL-safe term slug, e.g. `red`.
    pub slug: String,
    /// Display name, e.g. `Red`.
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default, rename = "type")]
    pub product_type: ProductType,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub regular_price: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub sale_price: Option<Decimal>,
    #[serde(default)]
    pub sale_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sale_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stock_status: StockStatus,
    #[serde(default)]
    pub catalog_visibility: CatalogVisibility,
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub gallery: Vec<ImageRef>,
    /// Taxonomy -> display value (comma separated when multi-valued).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub variation_attributes: Vec<VariationAttribute>,
    #[serde(default)]
    pub categories: Vec<Category>,
    /// Custom fields such as `_gtin` or `_mpn`.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub children: Vec<u64>,
    #[serde(default)]
    pub date_modified: Option<DateTime<Utc>>,
}

impl Product {
    pub fn is_variable(&self) -> bool {
        self.product_type == ProductType::Variable
    }

    pub fn is_variation(&self) -> bool {
        self.product_type == ProductType::Variation
    }

    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Publish
    }

    pub fn sku(&self) -> Option<&str> {
        self.sku.as_deref().map(str::trim).filter(|sku| !sku.is_empty())
    }

    /// Attribute value by taxonomy. Variations answer from their selected
    /// values before falling back to their own attribute map.
    pub fn attribute(&self, taxonomy: &str) -> Option<&str> {
        if taxonomy.is_empty() {
            return None;
        }

        self.variation_attributes
            .iter()
            .find(|attr| attr.taxonomy == taxonomy)
            .map(|attr| attr.name.as_str())
            .or_else(|| self.attributes.get(taxonomy).map(String::as_str))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        let Some(sale) = self.sale_price else {
            return false;
        };

        if let Some(regular) = self.regular_price {
            if sale >= regular {
                return false;
            }
        }

        if self.sale_from.is_some_and(|from| from > now) {
            return false;
        }

        if self.sale_to.is_some_and(|to| to < now) {
            return false;
        }

        true
    }
}

/// Host site context the feed is rendered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub site_id: u64,
    pub name: String,
    pub home_url: String,
    pub currency: String,
    pub default_country: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingBlock {
    pub country: String,
    pub price: String,
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxBlock {
    pub country: String,
    pub rate: String,
}

/// One sellable unit as it appears in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedItem {
    pub id: String,
    pub item_group_id: Option<String>,
    pub title: String,
    pub link: String,
    pub description: String,
    pub price: String,
    pub sale_price: Option<String>,
    pub sale_price_effective_date: Option<String>,
    pub availability: &'static str,
    pub condition: String,
    pub brand: Option<String>,
    pub image_link: Option<String>,
    pub additional_image_links: Vec<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub gtin: Option<String>,
    pub mpn: Option<String>,
    pub product_type: Option<String>,
    pub shipping: Option<ShippingBlock>,
    pub tax: Option<TaxBlock>,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub flush: Option<String>,
    #[serde(default, rename = "_wpnonce")]
    pub nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NonceQuery {
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct NonceResponse {
    pub action: String,
    pub nonce: String,
}

#[derive(Debug, Serialize)]
pub struct FeedStatusResponse {
    pub mode: &'static str,
    pub feed_url: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_generated: Option<DateTime<Utc>>,
    pub fingerprint: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    fn on_sale_product() -> Product {
        Product {
            id: 7,
            regular_price: Some(Decimal::new(2000, 2)),
            price: Some(Decimal::new(1500, 2)),
            sale_price: Some(Decimal::new(1500, 2)),
            ..Product::default()
        }
    }

    #[test]
    fn sale_requires_price_below_regular() {
        let mut product = on_sale_product();
        assert!(product.is_on_sale(at(10)));

        product.sale_price = Some(Decimal::new(2000, 2));
        assert!(!product.is_on_sale(at(10)));

        product.sale_price = None;
        assert!(!product.is_on_sale(at(10)));
    }

    #[test]
    fn sale_respects_date_window() {
        let mut product = on_sale_product();
        product.sale_from = Some(at(5));
        product.sale_to = Some(at(15));

        assert!(!product.is_on_sale(at(1)));
        assert!(product.is_on_sale(at(10)));
        assert!(!product.is_on_sale(at(20)));
    }

    #[test]
    fn variation_attribute_wins_over_attribute_map() {
        let mut product = Product {
            product_type: ProductType::Variation,
            ..Product::default()
        };
        product
            .attributes
            .insert("pa_color".to_string(), "Red, Blue".to_string());
        product.variation_attributes.push(VariationAttribute {
            taxonomy: "pa_color".to_string(),
            slug: "red".to_string(),
            name: "Red".to_string(),
        });

        assert_eq!(product.attribute("pa_color"), Some("Red"));
        assert_eq!(product.attribute("pa_size"), None);
        assert_eq!(product.attribute(""), None);
    }

    #[test]
    fn blank_sku_is_treated_as_missing() {
        let product = Product {
            sku: Some("  ".to_string()),
            ..Product::default()
        };
        assert_eq!(product.sku(), None);
    }

    #[test]
    fn availability_labels() {
        assert_eq!(StockStatus::InStock.availability(), "in stock");
        assert_eq!(StockStatus::OnBackorder.availability(), "preorder");
        assert_eq!(StockStatus::OutOfStock.availability(), "out of stock");
    }

    #[test]
    fn product_deserializes_with_defaults() {
        let product: Product = serde_json::from_str(
            r#"{"id": 3, "name": "Mug", "price": "12.5", "stock_status": "outofstock"}"#,
        )
        .unwrap();
        assert_eq!(product.product_type, ProductType::Simple);
        assert_eq!(product.status, PostStatus::Publish);
        assert_eq!(product.price, Some(Decimal::new(125, 1)));
        assert_eq!(product.stock_status, StockStatus::OutOfStock);
    }
}
