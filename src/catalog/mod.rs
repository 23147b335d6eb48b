// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Product catalog access.
//!
//! The feed never owns product data; it reads it through [`ProductCatalog`].
//! Two backends ship with the service: [`InMemoryCatalog`], loaded from a JSON
//! snapshot, and [`rest::RestCatalog`], which talks to a WooCommerce REST API.

pub mod rest;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::CatalogError;
use crate::model::{Product, ProductType};

/// Filters for one paginated product query. Only published, top-level
/// products are ever requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuery {
    pub per_page: u32,
    pub exclude_categories: BTreeSet<u64>,
    pub include_hidden: bool,
    /// Drop out-of-stock products. Variable products are exempt: their
    /// variations are stock-checked individually.
    pub in_stock_only: bool,
}

impl ProductQuery {
    /// Whether `product` passes every filter of this query.
    pub fn admits(&self, product: &Product) -> bool {
        if !product.is_published() || product.is_variation() {
            return false;
        }

        if product
            .categories
            .iter()
            .any(|category| self.exclude_categories.contains(&category.id))
        {
            return false;
        }

        if !self.include_hidden && product.catalog_visibility.is_excluded_from_catalog() {
            return false;
        }

        if self.in_stock_only && !product.is_variable() && !product.stock_status.is_in_stock() {
            return false;
        }

        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub total_pages: u32,
}

/// Read access to the product catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Fetch one 1-based page of products matching `query`.
    async fn query_products(&self, query: &ProductQuery, page: u32) -> Result<ProductPage, CatalogError>;
    /// Child variations of a variable product, in menu order.
    async fn variations(&self, parent: &Product) -> Result<Vec<Product>, CatalogError>;
    /// Most recent modification across published products and variations.
    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    products: Vec<Product>,
}

/// Catalog held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: Vec<Product>,
    by_id: HashMap<u64, usize>,
}

impl InMemoryCatalog {
    /// Children listed by a variable product are treated as its variations,
    /// whatever type the snapshot gives them.
    pub fn new(mut products: Vec<Product>) -> Self {
        let parents: HashMap<u64, u64> = products
            .iter()
            .filter(|product| product.is_variable())
            .flat_map(|parent| parent.children.iter().map(move |child| (*child, parent.id)))
            .collect();
        for product in &mut products {
            if let Some(parent_id) = parents.get(&product.id) {
                product.product_type = ProductType::Variation;
                product.parent_id = Some(*parent_id);
            }
        }

        let by_id = products
            .iter()
            .enumerate()
            .map(|(index, product)| (product.id, index))
            .collect();
        Self { products, by_id }
    }

    /// Load a snapshot of the form `{ "products": [...] }`. Variations are
    /// listed alongside their parents and linked through `children`.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let snapshot: Snapshot =
            serde_json::from_str(content).map_err(|e| CatalogError::Decode(e.to_string()))?;
        Ok(Self::new(snapshot.products))
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn get(&self, id: u64) -> Option<&Product> {
        self.by_id.get(&id).map(|index| &self.products[*index])
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn query_products(&self, query: &ProductQuery, page: u32) -> Result<ProductPage, CatalogError> {
        let per_page = query.per_page.max(1) as usize;
        let matching: Vec<&Product> = self.products.iter().filter(|p| query.admits(p)).collect();
        let total_pages = matching.len().div_ceil(per_page) as u32;

        let start = (page.max(1) as usize - 1) * per_page;
        let products = matching
            .into_iter()
            .skip(start)
            .take(per_page)
            .cloned()
            .collect();

        Ok(ProductPage {
            products,
            total_pages,
        })
    }

    async fn variations(&self, parent: &Product) -> Result<Vec<Product>, CatalogError> {
        Ok(parent
            .children
            .iter()
            .filter_map(|id| self.get(*id))
            .map(|child| {
                let mut variation = child.clone();
                variation.product_type = ProductType::Variation;
                variation.parent_id = Some(parent.id);
                variation
            })
            .collect())
    }

    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>, CatalogError> {
        Ok(self
            .products
            .iter()
            .filter(|product| product.is_published())
            .filter_map(|product| product.date_modified)
            .max())
    }
}
