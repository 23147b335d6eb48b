// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! One full generation pass: paginate, project, assemble.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::assembler::FeedAssembler;
use crate::catalog::ProductCatalog;
use crate::error::FeedError;
use crate::metrics::Metrics;
use crate::model::StoreInfo;
use crate::paginator::CatalogPaginator;
use crate::projector::ItemProjector;
use crate::settings::FeedSettings;

/// A serialized feed and what went into it.
#[derive(Debug, Clone)]
pub struct GeneratedFeed {
    pub body: String,
    pub items: usize,
    pub pages: u32,
}

#[derive(Clone)]
pub struct FeedGenerator {
    catalog: Arc<dyn ProductCatalog>,
    settings: Arc<FeedSettings>,
    store: StoreInfo,
    deadline: Duration,
    metrics: Option<Metrics>,
}

impl FeedGenerator {
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        settings: Arc<FeedSettings>,
        store: StoreInfo,
        deadline: Duration,
    ) -> Self {
        Self {
            catalog,
            settings,
            store,
            deadline,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn catalog(&self) -> &Arc<dyn ProductCatalog> {
        &self.catalog
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub fn store(&self) -> &StoreInfo {
        &self.store
    }

    /// Build the whole document. Fails as a unit: any catalog or
    /// serialization error, or running past the deadline, yields no feed.
    pub async fn generate(&self) -> Result<GeneratedFeed, FeedError> {
        let started = Instant::now();

        let outcome = match tokio::time::timeout(self.deadline, self.run()).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::DeadlineExceeded(self.deadline)),
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(feed) => {
                tracing::info!(
                    items = feed.items,
                    pages = feed.pages,
                    bytes = feed.body.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "feed generated"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_generation(feed.items, elapsed.as_secs_f64());
                }
            }
            Err(err) => {
                tracing::error!(error = %err, elapsed_ms = elapsed.as_millis() as u64, "feed generation failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_generation_failure();
                }
            }
        }

        outcome
    }

    async fn run(&self) -> Result<GeneratedFeed, FeedError> {
        let now = Utc::now();
        let projector = ItemProjector::new(&self.settings, &self.store, now);
        let mut assembler = FeedAssembler::new(&self.store);
        let mut paginator = CatalogPaginator::new(self.catalog.as_ref(), &self.settings);

        assembler.begin()?;
        while let Some(unit) = paginator.next_unit().await? {
            let item = projector.project(&unit.product, unit.parent.as_deref());
            assembler.push(&item)?;
        }

        let items = assembler.items();
        let pages = paginator.pages_fetched();
        let body = assembler.finish()?;

        Ok(GeneratedFeed { body, items, pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, MockProductCatalog, ProductPage};
    use crate::error::CatalogError;
    use crate::model::{Product, ProductType, VariationAttribute};
    use rust_decimal::Decimal;

    fn store() -> StoreInfo {
        StoreInfo {
            site_id: 1,
            name: "Acme".to_string(),
            home_url: "https://acme.test".to_string(),
            currency: "USD".to_string(),
            default_country: "US".to_string(),
        }
    }

    fn generator(catalog: impl ProductCatalog + 'static, deadline: Duration) -> FeedGenerator {
        FeedGenerator::new(
            Arc::new(catalog),
            Arc::new(FeedSettings::default()),
            store(),
            deadline,
        )
    }

    #[tokio::test]
    async fn simple_product_end_to_end() {
        let catalog = InMemoryCatalog::new(vec![Product {
            id: 1,
            sku: Some("ABC".to_string()),
            name: "Mug".to_string(),
            price: Some(Decimal::new(1000, 2)),
            ..Product::default()
        }]);

        let feed = generator(catalog, Duration::from_secs(5)).generate().await.unwrap();
        assert_eq!(feed.items, 1);
        assert!(feed.body.contains("<g:id>ABC</g:id>"));
        assert!(feed.body.contains("<g:price>10.00 USD</g:price>"));
        assert!(feed.body.contains("<g:availability>in stock</g:availability>"));
        assert!(feed.body.contains("<g:condition>new</g:condition>"));
        assert!(!feed.body.contains("g:sale_price"));
    }

    #[tokio::test]
    async fn pasted_control_characters_never_reach_the_document() {
        let catalog = InMemoryCatalog::new(vec![Product {
            id: 2,
            name: "Mug\u{0B}Tall".to_string(),
            description: "Bell\u{7}ringer".to_string(),
            price: Some(Decimal::new(500, 2)),
            ..Product::default()
        }]);

        let feed = generator(catalog, Duration::from_secs(5)).generate().await.unwrap();
        assert!(!feed.body.chars().any(|c| c < ' ' && !matches!(c, '\t' | '\n' | '\r')));
        assert!(feed.body.contains("<![CDATA[MugTall]]>"));
        assert!(feed.body.contains("<![CDATA[Bellringer]]>"));
    }

    #[tokio::test]
    async fn variable_product_end_to_end() {
        let parent = Product {
            id: 10,
            name: "Shirt".to_string(),
            product_type: ProductType::Variable,
            permalink: "https://acme.test/shirt".to_string(),
            children: vec![11],
            ..Product::default()
        };
        let variation = Product {
            id: 11,
            product_type: ProductType::Variation,
            parent_id: Some(10),
            price: Some(Decimal::new(2000, 2)),
            variation_attributes: vec![
                VariationAttribute {
                    taxonomy: "pa_color".to_string(),
                    slug: "red".to_string(),
                    name: "Red".to_string(),
                },
                VariationAttribute {
                    taxonomy: "pa_size".to_string(),
                    slug: "m".to_string(),
                    name: "M".to_string(),
                },
            ],
            ..Product::default()
        };

        let catalog = InMemoryCatalog::new(vec![parent, variation]);
        let feed = generator(catalog, Duration::from_secs(5)).generate().await.unwrap();

        assert_eq!(feed.items, 1);
        assert!(feed.body.contains("<![CDATA[Shirt - Red / M]]>"));
        assert!(feed.body.contains("<g:item_group_id>1-10</g:item_group_id>"));
        assert!(feed.body.contains("<g:id>1-11</g:id>"));
    }

    #[tokio::test]
    async fn catalog_failure_fails_the_whole_generation() {
        let mut catalog = MockProductCatalog::new();
        catalog.expect_query_products().returning(|_, page| {
            if page == 1 {
                Ok(ProductPage {
                    products: vec![Product {
                        id: 1,
                        ..Product::default()
                    }],
                    total_pages: 2,
                })
            } else {
                Err(CatalogError::Request("connection reset".to_string()))
            }
        });

        let metrics = Metrics::new().unwrap();
        let generator = generator(catalog, Duration::from_secs(5)).with_metrics(metrics.clone());
        assert!(matches!(
            generator.generate().await,
            Err(FeedError::Catalog(CatalogError::Request(_)))
        ));
        assert_eq!(metrics.generation_failures.get(), 1);
        assert_eq!(metrics.regenerations.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_catalog_hits_the_deadline() {
        struct Stalled;

        #[async_trait::async_trait]
        impl ProductCatalog for Stalled {
            async fn query_products(
                &self,
                _query: &crate::catalog::ProductQuery,
                _page: u32,
            ) -> Result<ProductPage, CatalogError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ProductPage::default())
            }

            async fn variations(&self, _parent: &Product) -> Result<Vec<Product>, CatalogError> {
                Ok(Vec::new())
            }

            async fn last_modified(&self) -> Result<Option<chrono::DateTime<Utc>>, CatalogError> {
                Ok(None)
            }
        }

        let result = generator(Stalled, Duration::from_secs(2)).generate().await;
        assert!(matches!(result, Err(FeedError::DeadlineExceeded(d)) if d == Duration::from_secs(2)));
    }
}
