//! Merchant catalog feed service.
//!
//! Projects a product catalog into a Facebook/Google Merchant RSS feed and
//! delivers it either from an in-memory TTL cache or as a static file.

pub mod api;
pub mod assembler;
pub mod catalog;
pub mod config;
pub mod delivery;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod model;
pub mod paginator;
pub mod policy;
pub mod projector;
pub mod settings;
pub mod state;
