// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Lazy, single-pass walk over every sellable unit in the catalog.
//!
//! Products are fetched one page at a time. Variable products are expanded
//! into their published variations; everything else is yielded as-is.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::catalog::{ProductCatalog, ProductQuery};
use crate::error::CatalogError;
use crate::model::Product;
use crate::settings::FeedSettings;

/// Products requested per catalog page.
pub const PAGE_SIZE: u32 = 50;

/// A product ready for projection, with its parent when it is a variation.
#[derive(Debug, Clone)]
pub struct SellableUnit {
    pub product: Product,
    pub parent: Option<Arc<Product>>,
}

pub struct CatalogPaginator<'a> {
    catalog: &'a dyn ProductCatalog,
    query: ProductQuery,
    include_out_of_stock: bool,
    page: u32,
    total_pages: u32,
    products: VecDeque<Product>,
    pending: VecDeque<SellableUnit>,
    pages_fetched: u32,
}

impl<'a> CatalogPaginator<'a> {
    pub fn new(catalog: &'a dyn ProductCatalog, settings: &FeedSettings) -> Self {
        let query = ProductQuery {
            per_page: PAGE_SIZE,
            exclude_categories: settings.exclude_categories.clone(),
            include_hidden: settings.include_hidden,
            in_stock_only: !settings.include_out_of_stock,
        };

        Self {
            catalog,
            query,
            include_out_of_stock: settings.include_out_of_stock,
            page: 0,
            total_pages: 0,
            products: VecDeque::new(),
            pending: VecDeque::new(),
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Next sellable unit, or `None` once the last page is drained.
    pub async fn next_unit(&mut self) -> Result<Option<SellableUnit>, CatalogError> {
        loop {
            if let Some(unit) = self.pending.pop_front() {
                return Ok(Some(unit));
            }

            if let Some(product) = self.products.pop_front() {
                self.expand(product).await?;
                continue;
            }

            if !self.fetch_next_page().await? {
                return Ok(None);
            }
        }
    }

    async fn fetch_next_page(&mut self) -> Result<bool, CatalogError> {
        // Page 1 is always requested; later pages only while the catalog
        // reports more.
        if self.page >= 1 && self.page >= self.total_pages {
            return Ok(false);
        }

        self.page += 1;
        let page = self.catalog.query_products(&self.query, self.page).await?;
        self.pages_fetched += 1;
        self.total_pages = page.total_pages;

        tracing::debug!(
            page = self.page,
            total_pages = self.total_pages,
            products = page.products.len(),
            "fetched catalog page"
        );

        let query = &self.query;
        self.products
            .extend(page.products.into_iter().filter(|product| query.admits(product)));

        Ok(true)
    }

    async fn expand(&mut self, product: Product) -> Result<(), CatalogError> {
        if !product.is_variable() {
            self.pending.push_back(SellableUnit {
                product,
                parent: None,
            });
            return Ok(());
        }

        let variations = self.catalog.variations(&product).await?;
        let parent = Arc::new(product);
        let before = self.pending.len();

        for variation in variations {
            if !variation.is_published() {
                continue;
            }
            if !self.include_out_of_stock && !variation.stock_status.is_in_stock() {
                continue;
            }
            self.pending.push_back(SellableUnit {
                product: variation,
                parent: Some(Arc::clone(&parent)),
            });
        }

        if self.pending.len() == before {
            tracing::debug!(product_id = parent.id, "variable product has no sellable variations");
        }

        Ok(())
    }
}
