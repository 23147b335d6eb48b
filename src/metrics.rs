// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for feed generation and delivery.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

use crate::error::AppError;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,

    // Cache metrics
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub cache_purges: IntCounter,
    pub cache_size: IntGauge,
    pub not_modified: IntCounter,
    pub invalidations: IntCounter,

    // Generation metrics
    pub regenerations: IntCounter,
    pub generation_failures: IntCounter,
    pub items_emitted: IntCounter,
    pub generation_duration: Histogram,

    pub requests_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, AppError> {
    let metric = IntCounter::with_opts(Opts::new(name, help))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create metric: {}", e)))?;
    registry
        .register(Box::new(metric.clone()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to register metric: {}", e)))?;
    Ok(metric)
}

impl Metrics {
    pub fn new() -> Result<Self, AppError> {
        let registry = Registry::new();

        let cache_hits = counter(
            &registry,
            "merchant_feed_cache_hits_total",
            "Feed requests served from the cache",
        )?;
        let cache_misses = counter(
            &registry,
            "merchant_feed_cache_misses_total",
            "Feed requests that found no cached document",
        )?;
        let cache_purges = counter(
            &registry,
            "merchant_feed_cache_purges_total",
            "Expired cache entries removed by the janitor",
        )?;
        let not_modified = counter(
            &registry,
            "merchant_feed_not_modified_total",
            "Conditional feed requests answered with 304",
        )?;
        let invalidations = counter(
            &registry,
            "merchant_feed_invalidations_total",
            "Cache flushes and static file deletions",
        )?;
        let regenerations = counter(
            &registry,
            "merchant_feed_regenerations_total",
            "Completed feed generations",
        )?;
        let generation_failures = counter(
            &registry,
            "merchant_feed_generation_failures_total",
            "Feed generations that failed or timed out",
        )?;
        let items_emitted = counter(
            &registry,
            "merchant_feed_items_emitted_total",
            "Items written across all feed generations",
        )?;
        let requests_total = counter(
            &registry,
            "merchant_feed_requests_total",
            "Requests to the public feed route",
        )?;

        let cache_size = IntGauge::with_opts(Opts::new(
            "merchant_feed_cache_size",
            "Current number of cache entries",
        ))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create metric: {}", e)))?;
        registry
            .register(Box::new(cache_size.clone()))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to register metric: {}", e)))?;

        let generation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "merchant_feed_generation_duration_seconds",
                "Wall time of a full feed generation in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create metric: {}", e)))?;
        registry
            .register(Box::new(generation_duration.clone()))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to register metric: {}", e)))?;

        Ok(Self {
            registry: Arc::new(registry),
            cache_hits,
            cache_misses,
            cache_purges,
            cache_size,
            not_modified,
            invalidations,
            regenerations,
            generation_failures,
            items_emitted,
            generation_duration,
            requests_total,
        })
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    pub fn record_cache_purge(&self, count: usize) {
        self.cache_purges.inc_by(count as u64);
    }

    pub fn update_cache_size(&self, size: usize) {
        self.cache_size.set(size as i64);
    }

    pub fn record_not_modified(&self) {
        self.not_modified.inc();
    }

    pub fn record_invalidation(&self) {
        self.invalidations.inc();
    }

    pub fn record_request(&self) {
        self.requests_total.inc();
    }

    /// Record a finished generation and how many items it wrote.
    pub fn record_generation(&self, items: usize, seconds: f64) {
        self.regenerations.inc();
        self.items_emitted.inc_by(items as u64);
        self.generation_duration.observe(seconds);
    }

    pub fn record_generation_failure(&self) {
        self.generation_failures.inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, AppError> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Failed to convert metrics to string: {}",
                e
            ))
        })
    }
}
