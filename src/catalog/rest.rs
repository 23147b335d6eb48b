// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! WooCommerce REST v3 catalog backend.
//!
//! Pages through `/wp-json/wc/v3/products` using the `X-WP-TotalPages`
//! header and translates the REST representation into [`Product`]s. The REST
//! API cannot exclude categories or exempt variable products from a stock
//! filter, so [`ProductQuery::admits`] is applied to every fetched page.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ProductCatalog, ProductPage, ProductQuery};
use crate::config::RestCatalogConfig;
use crate::error::CatalogError;
use crate::model::{
    CatalogVisibility, Category, ImageRef, PostStatus, Product, ProductType, StockStatus,
    VariationAttribute,
};

const VARIATIONS_PER_PAGE: u32 = 100;

/// HTTP client for a WooCommerce store.
#[derive(Clone)]
pub struct RestCatalog {
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
    client: Client,
}

impl RestCatalog {
    pub fn try_new(config: RestCatalogConfig) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CatalogError::Request(format!("failed to build catalog client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            consumer_key: config.consumer_key,
            consumer_secret: config.consumer_secret,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/wp-json/wc/v3/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(T, u32), CatalogError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .query(params)
            .send()
            .await
            .map_err(|e| CatalogError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(path, %status, "catalog request rejected");
            return Err(CatalogError::Status(status.as_u16()));
        }

        let total_pages = response
            .headers()
            .get("x-wp-totalpages")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(1);

        let body = response
            .json::<T>()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;

        Ok((body, total_pages))
    }
}

#[async_trait]
impl ProductCatalog for RestCatalog {
    async fn query_products(&self, query: &ProductQuery, page: u32) -> Result<ProductPage, CatalogError> {
        let params = [
            ("status", "publish".to_string()),
            ("per_page", query.per_page.to_string()),
            ("page", page.to_string()),
            ("orderby", "id".to_string()),
            ("order", "asc".to_string()),
        ];
        let (raw, total_pages): (Vec<RestProduct>, u32) = self.fetch("products", &params).await?;

        let products = raw
            .into_iter()
            .map(RestProduct::into_product)
            .filter(|product| query.admits(product))
            .collect();

        Ok(ProductPage {
            products,
            total_pages,
        })
    }

    async fn variations(&self, parent: &Product) -> Result<Vec<Product>, CatalogError> {
        let path = format!("products/{}/variations", parent.id);
        let mut variations = Vec::new();
        let mut page = 1;

        loop {
            let params = [
                ("per_page", VARIATIONS_PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let (raw, total_pages): (Vec<RestProduct>, u32) = self.fetch(&path, &params).await?;
            variations.extend(raw.into_iter().map(|variation| {
                let mut product = variation.into_product();
                product.product_type = ProductType::Variation;
                product.parent_id = Some(parent.id);
                product
            }));

            page += 1;
            if page > total_pages {
                break;
            }
        }

        Ok(variations)
    }

    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>, CatalogError> {
        let params = [
            ("status", "publish".to_string()),
            ("per_page", "1".to_string()),
            ("orderby", "modified".to_string()),
            ("order", "desc".to_string()),
        ];
        let (raw, _): (Vec<RestProduct>, u32) = self.fetch("products", &params).await?;
        Ok(raw
            .into_iter()
            .next()
            .and_then(|product| parse_gmt(product.date_modified_gmt.as_deref())))
    }
}

#[derive(Debug, Deserialize)]
struct RestProduct {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    product_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    catalog_visibility: Option<String>,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    regular_price: Option<String>,
    #[serde(default)]
    sale_price: Option<String>,
    #[serde(default)]
    date_on_sale_from_gmt: Option<String>,
    #[serde(default)]
    date_on_sale_to_gmt: Option<String>,
    #[serde(default)]
    date_modified_gmt: Option<String>,
    #[serde(default)]
    stock_status: Option<String>,
    #[serde(default)]
    categories: Vec<RestCategory>,
    /// Products: featured image first, then gallery.
    #[serde(default)]
    images: Vec<RestImage>,
    /// Variations carry a single image.
    #[serde(default)]
    image: Option<RestImage>,
    #[serde(default)]
    attributes: Vec<RestAttribute>,
    #[serde(default)]
    meta_data: Vec<RestMeta>,
    #[serde(default)]
    parent_id: Option<u64>,
    #[serde(default)]
    variations: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct RestCategory {
    id: u64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RestImage {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    src: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestAttribute {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    slug: Option<String>,
    /// Product-level attribute values.
    #[serde(default)]
    options: Vec<String>,
    /// Variation-level selected value.
    #[serde(default)]
    option: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestMeta {
    key: String,
    #[serde(default)]
    value: serde_json::Value,
}

impl RestAttribute {
    fn taxonomy(&self) -> String {
        if let Some(slug) = self.slug.as_deref().filter(|slug| !slug.is_empty()) {
            return slug.to_string();
        }
        let base = slugify(&self.name);
        if self.id > 0 {
            format!("pa_{base}")
        } else {
            base
        }
    }
}

impl RestProduct {
    fn into_product(self) -> Product {
        let product_type = match self.product_type.as_deref() {
            Some("variable") => ProductType::Variable,
            Some("variation") => ProductType::Variation,
            Some("grouped") => ProductType::Grouped,
            Some("external") => ProductType::External,
            _ => ProductType::Simple,
        };

        let status = match self.status.as_deref() {
            Some("draft") => PostStatus::Draft,
            Some("pending") => PostStatus::Pending,
            Some("private") => PostStatus::Private,
            _ => PostStatus::Publish,
        };

        let catalog_visibility = match self.catalog_visibility.as_deref() {
            Some("catalog") => CatalogVisibility::Catalog,
            Some("search") => CatalogVisibility::Search,
            Some("hidden") => CatalogVisibility::Hidden,
            _ => CatalogVisibility::Visible,
        };

        let stock_status = match self.stock_status.as_deref() {
            Some("outofstock") => StockStatus::OutOfStock,
            Some("onbackorder") => StockStatus::OnBackorder,
            _ => StockStatus::InStock,
        };

        let to_ref = |image: RestImage| ImageRef {
            id: image.id,
            url: image.src.filter(|src| !src.is_empty()),
        };

        let mut images = self.images.into_iter().map(to_ref);
        let (image, gallery) = match self.image {
            Some(own) => (Some(to_ref(own)), Vec::new()),
            None => (images.next(), images.collect()),
        };

        let mut attributes = BTreeMap::new();
        let mut variation_attributes = Vec::new();
        for attribute in self.attributes {
            let taxonomy = attribute.taxonomy();
            match attribute.option {
                Some(option) => variation_attributes.push(VariationAttribute {
                    taxonomy,
                    slug: slugify(&option),
                    name: option,
                }),
                None => {
                    attributes.insert(taxonomy, attribute.options.join(", "));
                }
            }
        }

        let meta = self
            .meta_data
            .into_iter()
            .filter_map(|entry| {
                let value = match entry.value {
                    serde_json::Value::String(text) => text,
                    serde_json::Value::Number(number) => number.to_string(),
                    _ => return None,
                };
                Some((entry.key, value))
            })
            .collect();

        Product {
            id: self.id,
            sku: self.sku,
            product_type,
            status,
            name: self.name,
            permalink: self.permalink,
            description: self.description,
            regular_price: parse_decimal(self.regular_price.as_deref()),
            price: parse_decimal(self.price.as_deref()),
            sale_price: parse_decimal(self.sale_price.as_deref()),
            sale_from: parse_gmt(self.date_on_sale_from_gmt.as_deref()),
            sale_to: parse_gmt(self.date_on_sale_to_gmt.as_deref()),
            stock_status,
            catalog_visibility,
            image,
            gallery,
            attributes,
            variation_attributes,
            categories: self
                .categories
                .into_iter()
                .map(|category| Category {
                    id: category.id,
                    name: category.name,
                })
                .collect(),
            meta,
            parent_id: self.parent_id.filter(|id| *id > 0),
            children: self.variations,
            date_modified: parse_gmt(self.date_modified_gmt.as_deref()),
        }
    }
}

fn parse_decimal(raw: Option<&str>) -> Option<Decimal> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse().ok())
}

/// WooCommerce `*_gmt` fields are naive `YYYY-MM-DDTHH:MM:SS` in UTC.
fn parse_gmt(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn slugify(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
