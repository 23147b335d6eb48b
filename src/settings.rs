// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Feed settings: the raw key-value store and its typed view.
//!
//! Settings arrive as a flat JSON object written by an external admin form.
//! Two historical encodings coexist (`"yes"`/`"no"` checkboxes and `1`/`0`
//! checkboxes), so every typed accessor accepts both. [`FeedSettings`] is
//! parsed once per snapshot and is immutable afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A resolved setting value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl SettingValue {
    pub fn is_list(&self) -> bool {
        matches!(self, SettingValue::List(_))
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::Object(_) => None,
            Value::Bool(flag) => Some(SettingValue::Bool(*flag)),
            Value::Number(number) => Some(match number.as_i64() {
                Some(int) => SettingValue::Int(int),
                None => SettingValue::Text(number.to_string()),
            }),
            Value::String(text) => Some(SettingValue::Text(text.clone())),
            Value::Array(items) => Some(SettingValue::List(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(text.clone()),
                        Value::Number(number) => Some(number.to_string()),
                        _ => None,
                    })
                    .collect(),
            )),
        }
    }
}

/// The raw settings mapping, exactly as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSettings {
    values: BTreeMap<String, Value>,
}

impl RawSettings {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    /// Load settings from a JSON object on disk. A missing file means
    /// "nothing saved yet" and resolves every key to its default.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "settings file not found; using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read settings file {}", path.display()))
            }
        };

        Self::from_json(&content)
            .with_context(|| format!("invalid settings file {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let values: BTreeMap<String, Value> =
            serde_json::from_str(content).context("settings must be a JSON object")?;
        Ok(Self { values })
    }

    /// Look up `key`, falling back to `default`. A collection default is
    /// never replaced by a scalar.
    pub fn get_setting(&self, key: &str, default: SettingValue) -> SettingValue {
        let Some(stored) = self.values.get(key).and_then(SettingValue::from_json) else {
            return default;
        };

        if default.is_list() && !stored.is_list() {
            return default;
        }

        stored
    }

    /// Hex SHA-256 over the key-sorted JSON encoding of the whole mapping.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&self.values).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(b"settings\0");
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get_setting(key, SettingValue::Bool(default)) {
            SettingValue::Bool(flag) => flag,
            SettingValue::Int(int) => int != 0,
            SettingValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "yes" | "1" | "true" | "on" => true,
                "no" | "0" | "false" | "off" | "" => false,
                other => {
                    tracing::warn!(key, value = other, "unrecognised boolean setting; using default");
                    default
                }
            },
            SettingValue::List(_) => default,
        }
    }

    fn text(&self, key: &str, default: &str) -> String {
        match self.get_setting(key, SettingValue::Text(default.to_string())) {
            SettingValue::Text(text) => text.trim().to_string(),
            SettingValue::Int(int) => int.to_string(),
            SettingValue::Bool(_) | SettingValue::List(_) => default.to_string(),
        }
    }

    fn integer(&self, key: &str, default: i64) -> i64 {
        match self.get_setting(key, SettingValue::Int(default)) {
            SettingValue::Int(int) => int,
            SettingValue::Text(text) => text.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %text, "non-numeric setting; using default");
                default
            }),
            SettingValue::Bool(_) | SettingValue::List(_) => default,
        }
    }

    fn id_set(&self, key: &str) -> BTreeSet<u64> {
        match self.get_setting(key, SettingValue::List(Vec::new())) {
            SettingValue::List(items) => items
                .iter()
                .filter_map(|item| item.trim().parse().ok())
                .collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// Condition reported for every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Condition {
    #[default]
    New,
    Refurbished,
    Used,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::Refurbished => "refurbished",
            Condition::Used => "used",
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Condition::New),
            "refurbished" => Ok(Condition::Refurbished),
            "used" => Ok(Condition::Used),
            other => Err(format!("unknown condition {other:?}")),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed, immutable view over [`RawSettings`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    pub include_out_of_stock: bool,
    pub include_hidden: bool,
    pub strip_shortcodes: bool,
    pub use_sale_price: bool,
    /// Zero means the cached feed never expires on its own.
    pub cache_ttl: Duration,
    pub brand_fallback: String,
    pub brand_attribute: String,
    pub color_attribute: String,
    pub size_attribute: String,
    pub exclude_categories: BTreeSet<u64>,
    pub default_condition: Condition,
    pub mpn_prefix: String,
    pub shipping_country: String,
    pub shipping_price: Option<Decimal>,
    pub shipping_service: String,
    pub tax_rate: String,
    fingerprint: String,
}

impl FeedSettings {
    pub fn from_raw(raw: &RawSettings) -> Self {
        let cache_minutes = raw.integer("cache_ttl", 60).max(0) as u64;

        let default_condition = raw
            .text("default_condition", "new")
            .parse()
            .unwrap_or_else(|err| {
                tracing::warn!(%err, "invalid default_condition; using `new`");
                Condition::New
            });

        let shipping_price = {
            let raw_price = raw.text("shipping_price", "");
            if raw_price.is_empty() {
                None
            } else {
                match raw_price.parse::<Decimal>() {
                    Ok(price) => Some(price),
                    Err(err) => {
                        tracing::warn!(%err, value = %raw_price, "invalid shipping_price; shipping omitted");
                        None
                    }
                }
            }
        };

        Self {
            include_out_of_stock: raw.flag("include_out_of_stock", false),
            include_hidden: raw.flag("include_hidden", false),
            strip_shortcodes: raw.flag("strip_shortcodes", true),
            use_sale_price: raw.flag("use_sale_price", true),
            cache_ttl: Duration::from_secs(cache_minutes.saturating_mul(60)),
            brand_fallback: raw.text("brand_fallback", ""),
            brand_attribute: raw.text("brand_attribute", ""),
            color_attribute: raw.text("color_attribute", "pa_color"),
            size_attribute: raw.text("size_attribute", "pa_size"),
            exclude_categories: raw.id_set("exclude_categories"),
            default_condition,
            mpn_prefix: raw.text("mpn_prefix", ""),
            shipping_country: raw.text("shipping_country", ""),
            shipping_price,
            shipping_service: raw.text("shipping_service", ""),
            tax_rate: raw.text("tax_rate", ""),
            fingerprint: raw.fingerprint(),
        }
    }

    /// Fingerprint of the raw mapping this view was parsed from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self::from_raw(&RawSettings::default())
    }
}
