// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Projection of catalog products into feed items.
//!
//! Every rule here is a pure function of the product, its optional parent,
//! the feed settings, the store context and the generation instant.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use rust_decimal::{Decimal, RoundingStrategy};
use url::Url;

use crate::model::{FeedItem, ImageRef, Product, ShippingBlock, StoreInfo, TaxBlock};
use crate::settings::FeedSettings;

/// Maximum description length, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 4999;
/// Maximum number of gallery images considered per item.
pub const MAX_ADDITIONAL_IMAGES: usize = 10;

const EFFECTIVE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

static SHORTCODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(/)?([A-Za-z][\w-]*)(\s[^\[\]]*?)?(/)?\]").expect("valid shortcode regex")
});
static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style)\b[^>]*>.*?</(?:script|style)\s*>").expect("valid regex")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

pub struct ItemProjector<'a> {
    settings: &'a FeedSettings,
    store: &'a StoreInfo,
    now: DateTime<Utc>,
}

impl<'a> ItemProjector<'a> {
    pub fn new(settings: &'a FeedSettings, store: &'a StoreInfo, now: DateTime<Utc>) -> Self {
        Self {
            settings,
            store,
            now,
        }
    }

    pub fn project(&self, product: &Product, parent: Option<&Product>) -> FeedItem {
        let parent = parent.filter(|_| product.is_variation());
        let (sale_price, sale_price_effective_date) = self.sale(product);

        FeedItem {
            id: self.item_id(product),
            item_group_id: parent.map(|parent| self.item_id(parent)),
            title: title(product, parent),
            link: link(product, parent),
            description: self.description(product, parent),
            price: self.money(product.price.unwrap_or_default()),
            sale_price,
            sale_price_effective_date,
            availability: product.stock_status.availability(),
            condition: self.settings.default_condition.to_string(),
            brand: self.brand(product, parent),
            image_link: image_link(product, parent),
            additional_image_links: additional_images(product, parent),
            color: attribute_value(&self.settings.color_attribute, product, parent),
            size: attribute_value(&self.settings.size_attribute, product, parent),
            gtin: product
                .meta("_gtin")
                .or_else(|| product.meta("_wc_gtin_code"))
                .map(str::to_string),
            mpn: self.mpn(product),
            product_type: product_type(parent.unwrap_or(product)),
            shipping: self.shipping(),
            tax: self.tax(),
        }
    }

    /// SKU when present, otherwise `{site_id}-{product_id}`.
    pub fn item_id(&self, product: &Product) -> String {
        match product.sku() {
            Some(sku) => sku.to_string(),
            None => format!("{}-{}", self.store.site_id, product.id),
        }
    }

    fn money(&self, amount: Decimal) -> String {
        format_money(amount, &self.store.currency)
    }

    fn description(&self, product: &Product, parent: Option<&Product>) -> String {
        let raw = if !product.description.trim().is_empty() {
            product.description.as_str()
        } else {
            parent.map(|p| p.description.as_str()).unwrap_or_default()
        };

        clean_description(raw, self.settings.strip_shortcodes)
    }

    fn sale(&self, product: &Product) -> (Option<String>, Option<String>) {
        if !self.settings.use_sale_price || !product.is_on_sale(self.now) {
            return (None, None);
        }

        let Some(sale_price) = product.sale_price else {
            return (None, None);
        };

        let effective = match (product.sale_from, product.sale_to) {
            (Some(from), Some(to)) => Some(format!(
                "{}/{}",
                from.format(EFFECTIVE_DATE_FORMAT),
                to.format(EFFECTIVE_DATE_FORMAT)
            )),
            _ => None,
        };

        (Some(self.money(sale_price)), effective)
    }

    fn brand(&self, product: &Product, parent: Option<&Product>) -> Option<String> {
        attribute_value(&self.settings.brand_attribute, product, parent).or_else(|| {
            let fallback = self.settings.brand_fallback.trim();
            (!fallback.is_empty()).then(|| fallback.to_string())
        })
    }

    fn mpn(&self, product: &Product) -> Option<String> {
        if let Some(mpn) = product.meta("_mpn") {
            return Some(mpn.to_string());
        }

        let prefix = self.settings.mpn_prefix.as_str();
        if prefix.is_empty() {
            return None;
        }

        Some(match product.sku() {
            Some(sku) => format!("{prefix}{sku}"),
            None => format!("{prefix}{}", product.id),
        })
    }

    fn shipping(&self) -> Option<ShippingBlock> {
        let country = self.settings.shipping_country.as_str();
        let price = self.settings.shipping_price?;
        if country.is_empty() {
            return None;
        }

        let service = self.settings.shipping_service.as_str();
        Some(ShippingBlock {
            country: country.to_string(),
            price: self.money(price),
            service: (!service.is_empty()).then(|| service.to_string()),
        })
    }

    fn tax(&self) -> Option<TaxBlock> {
        let rate = self.settings.tax_rate.as_str();
        if rate.is_empty() {
            return None;
        }

        let country = if self.settings.shipping_country.is_empty() {
            self.store.default_country.clone()
        } else {
            self.settings.shipping_country.clone()
        };

        Some(TaxBlock {
            country,
            rate: rate.to_string(),
        })
    }
}

/// `12.5` in `USD` renders as `12.50 USD`.
pub fn format_money(amount: Decimal, currency: &str) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.2} {currency}")
}

fn title(product: &Product, parent: Option<&Product>) -> String {
    let Some(parent) = parent else {
        return product.name.clone();
    };

    let values: Vec<&str> = product
        .variation_attributes
        .iter()
        .map(|attr| attr.name.trim())
        .filter(|name| !name.is_empty())
        .collect();

    if values.is_empty() {
        parent.name.clone()
    } else {
        format!("{} - {}", parent.name, values.join(" / "))
    }
}

fn link(product: &Product, parent: Option<&Product>) -> String {
    let Some(parent) = parent else {
        return product.permalink.clone();
    };

    let pairs: Vec<(String, &str)> = product
        .variation_attributes
        .iter()
        .map(|attr| (format!("attribute_{}", attr.taxonomy), attr.slug.as_str()))
        .collect();

    if pairs.is_empty() {
        return parent.permalink.clone();
    }

    match Url::parse(&parent.permalink) {
        Ok(mut url) => {
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in &pairs {
                    query.append_pair(key, value);
                }
            }
            url.to_string()
        }
        Err(_) => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in &pairs {
                serializer.append_pair(key, value);
            }
            let separator = if parent.permalink.contains('?') { '&' } else { '?' };
            format!("{}{}{}", parent.permalink, separator, serializer.finish())
        }
    }
}

/// Strip markup from a product description and cap its length.
pub fn clean_description(raw: &str, strip_shortcodes: bool) -> String {
    let text = if strip_shortcodes {
        strip_shortcode_tags(raw)
    } else {
        raw.to_string()
    };

    let text = SCRIPT_STYLE_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, " ");
    let text = WHITESPACE_RE.replace_all(&text, " ");

    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_DESCRIPTION_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

/// Remove shortcode tags and keep their enclosed text. A bare `[word]` is
/// only a shortcode when the text also closes it with `[/word]`.
fn strip_shortcode_tags(raw: &str) -> String {
    SHORTCODE_RE
        .replace_all(raw, |caps: &Captures<'_>| {
            let closing = caps.get(1).is_some();
            let has_attributes = caps.get(3).is_some();
            let self_closing = caps.get(4).is_some();
            let name = &caps[2];

            if closing || has_attributes || self_closing || raw.contains(&format!("[/{name}]")) {
                " ".to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn attached(image: Option<&ImageRef>) -> Option<&ImageRef> {
    image.filter(|image| image.id != 0)
}

fn image_link(product: &Product, parent: Option<&Product>) -> Option<String> {
    attached(product.image.as_ref())
        .or_else(|| parent.and_then(|parent| attached(parent.image.as_ref())))
        .and_then(|image| image.url.clone())
}

fn additional_images(product: &Product, parent: Option<&Product>) -> Vec<String> {
    parent
        .unwrap_or(product)
        .gallery
        .iter()
        .take(MAX_ADDITIONAL_IMAGES)
        .filter_map(|image| image.url.clone())
        .collect()
}

fn attribute_value(taxonomy: &str, product: &Product, parent: Option<&Product>) -> Option<String> {
    product
        .attribute(taxonomy)
        .or_else(|| parent.and_then(|parent| parent.attribute(taxonomy)))
        .map(str::to_string)
}

fn product_type(product: &Product) -> Option<String> {
    let names: Vec<&str> = product
        .categories
        .iter()
        .map(|category| category.name.trim())
        .filter(|name| !name.is_empty())
        .collect();

    (!names.is_empty()).then(|| names.join(" > "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, ProductType, StockStatus, VariationAttribute};
    use crate::settings::RawSettings;
    use chrono::TimeZone;
    use serde_json::json;

    fn store() -> StoreInfo {
        StoreInfo {
            site_id: 1,
            name: "Acme".to_string(),
            home_url: "https://acme.test".to_string(),
            currency: "USD".to_string(),
            default_country: "US".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn settings(value: serde_json::Value) -> FeedSettings {
        FeedSettings::from_raw(&RawSettings::from_json(&value.to_string()).unwrap())
    }

    fn image(id: u64) -> ImageRef {
        ImageRef {
            id,
            url: Some(format!("https://acme.test/img/{id}.jpg")),
        }
    }

    fn simple() -> Product {
        Product {
            id: 42,
            sku: Some("ABC".to_string()),
            name: "Mug".to_string(),
            permalink: "https://acme.test/product/mug".to_string(),
            description: "<p>A mug.</p>".to_string(),
            price: Some(Decimal::new(1000, 2)),
            regular_price: Some(Decimal::new(1000, 2)),
            ..Product::default()
        }
    }

    fn shirt_and_variation() -> (Product, Product) {
        let parent = Product {
            id: 100,
            name: "Shirt".to_string(),
            product_type: ProductType::Variable,
            permalink: "https://acme.test/product/shirt/".to_string(),
            description: "Soft cotton shirt".to_string(),
            image: Some(image(1)),
            gallery: (2..=14).map(image).collect(),
            categories: vec![
                Category {
                    id: 1,
                    name: "Clothing".to_string(),
                },
                Category {
                    id: 2,
                    name: "Shirts".to_string(),
                },
            ],
            children: vec![101],
            ..Product::default()
        };
        let variation = Product {
            id: 101,
            product_type: ProductType::Variation,
            parent_id: Some(100),
            price: Some(Decimal::new(2500, 2)),
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
        (parent, variation)
    }

    #[test]
    fn simple_product_with_defaults() {
        let settings = FeedSettings::default();
        let store = store();
        let item = ItemProjector::new(&settings, &store, now()).project(&simple(), None);

        assert_eq!(item.id, "ABC");
        assert_eq!(item.item_group_id, None);
        assert_eq!(item.title, "Mug");
        assert_eq!(item.link, "https://acme.test/product/mug");
        assert_eq!(item.description, "A mug.");
        assert_eq!(item.price, "10.00 USD");
        assert_eq!(item.sale_price, None);
        assert_eq!(item.availability, "in stock");
        assert_eq!(item.condition, "new");
        assert_eq!(item.brand, None);
        assert_eq!(item.shipping, None);
        assert_eq!(item.tax, None);
    }

    #[test]
    fn variation_title_link_group_and_fallbacks() {
        let settings = FeedSettings::default();
        let store = store();
        let (parent, variation) = shirt_and_variation();
        let item = ItemProjector::new(&settings, &store, now()).project(&variation, Some(&parent));

        assert_eq!(item.id, "1-101");
        assert_eq!(item.item_group_id.as_deref(), Some("1-100"));
        assert_eq!(item.title, "Shirt - Red / M");
        assert_eq!(
            item.link,
            "https://acme.test/product/shirt/?attribute_pa_color=red&attribute_pa_size=m"
        );
        assert_eq!(item.description, "Soft cotton shirt");
        assert_eq!(item.price, "25.00 USD");
        assert_eq!(item.color.as_deref(), Some("Red"));
        assert_eq!(item.size.as_deref(), Some("M"));
        assert_eq!(item.image_link.as_deref(), Some("https://acme.test/img/1.jpg"));
        assert_eq!(item.additional_image_links.len(), MAX_ADDITIONAL_IMAGES);
        assert_eq!(item.product_type.as_deref(), Some("Clothing > Shirts"));
    }

    #[test]
    fn group_id_uses_parent_sku_when_present() {
        let settings = FeedSettings::default();
        let store = store();
        let (mut parent, variation) = shirt_and_variation();
        parent.sku = Some("SHIRT".to_string());
        let item = ItemProjector::new(&settings, &store, now()).project(&variation, Some(&parent));
        assert_eq!(item.item_group_id.as_deref(), Some("SHIRT"));
    }

    #[test]
    fn variation_own_image_wins() {
        let settings = FeedSettings::default();
        let store = store();
        let (parent, mut variation) = shirt_and_variation();
        variation.image = Some(image(77));
        let item = ItemProjector::new(&settings, &store, now()).project(&variation, Some(&parent));
        assert_eq!(item.image_link.as_deref(), Some("https://acme.test/img/77.jpg"));
    }

    #[test]
    fn gallery_cap_counts_unresolved_attachments() {
        let settings = FeedSettings::default();
        let store = store();
        let mut product = simple();
        product.gallery = (1..=12)
            .map(|id| ImageRef {
                id,
                url: (id % 2 == 0).then(|| format!("https://acme.test/{id}.jpg")),
            })
            .collect();

        let item = ItemProjector::new(&settings, &store, now()).project(&product, None);
        assert_eq!(item.additional_image_links.len(), 5);
    }

    #[test]
    fn sale_price_requires_setting_and_active_sale() {
        let store = store();
        let mut product = simple();
        product.regular_price = Some(Decimal::new(2000, 2));
        product.sale_price = Some(Decimal::new(1500, 2));

        let enabled = FeedSettings::default();
        let item = ItemProjector::new(&enabled, &store, now()).project(&product, None);
        assert_eq!(item.sale_price.as_deref(), Some("15.00 USD"));
        assert_eq!(item.sale_price_effective_date, None);

        let disabled = settings(json!({ "use_sale_price": "no" }));
        let item = ItemProjector::new(&disabled, &store, now()).project(&product, None);
        assert_eq!(item.sale_price, None);

        product.sale_to = Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
        let item = ItemProjector::new(&enabled, &store, now()).project(&product, None);
        assert_eq!(item.sale_price, None, "expired sale must not be emitted");
    }

    #[test]
    fn effective_date_needs_both_bounds() {
        let settings = FeedSettings::default();
        let store = store();
        let mut product = simple();
        product.regular_price = Some(Decimal::new(2000, 2));
        product.sale_price = Some(Decimal::new(1500, 2));
        product.sale_from = Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());

        let item = ItemProjector::new(&settings, &store, now()).project(&product, None);
        assert!(item.sale_price.is_some());
        assert_eq!(item.sale_price_effective_date, None);

        product.sale_to = Some(Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap());
        let item = ItemProjector::new(&settings, &store, now()).project(&product, None);
        assert_eq!(
            item.sale_price_effective_date.as_deref(),
            Some("2025-06-01T00:00:00Z/2025-06-30T23:59:59Z")
        );
    }

    #[test]
    fn availability_follows_stock_status() {
        let settings = FeedSettings::default();
        let store = store();
        let mut product = simple();
        product.stock_status = StockStatus::OnBackorder;
        let item = ItemProjector::new(&settings, &store, now()).project(&product, None);
        assert_eq!(item.availability, "preorder");
    }

    #[test]
    fn brand_attribute_then_fallback() {
        let store = store();
        let mut product = simple();

        let settings_with_fallback = settings(json!({
            "brand_attribute": "pa_brand",
            "brand_fallback": "Acme",
        }));
        let item = ItemProjector::new(&settings_with_fallback, &store, now()).project(&product, None);
        assert_eq!(item.brand.as_deref(), Some("Acme"));

        product
            .attributes
            .insert("pa_brand".to_string(), "Globex".to_string());
        let item = ItemProjector::new(&settings_with_fallback, &store, now()).project(&product, None);
        assert_eq!(item.brand.as_deref(), Some("Globex"));
    }

    #[test]
    fn gtin_and_mpn_sources() {
        let store = store();
        let mut product = simple();
        product
            .meta
            .insert("_wc_gtin_code".to_string(), "4006381333931".to_string());

        let prefixed = settings(json!({ "mpn_prefix": "ACME-" }));
        let item = ItemProjector::new(&prefixed, &store, now()).project(&product, None);
        assert_eq!(item.gtin.as_deref(), Some("4006381333931"));
        assert_eq!(item.mpn.as_deref(), Some("ACME-ABC"));

        product.sku = None;
        let item = ItemProjector::new(&prefixed, &store, now()).project(&product, None);
        assert_eq!(item.mpn.as_deref(), Some("ACME-42"));

        product.meta.insert("_gtin".to_string(), "123".to_string());
        product.meta.insert("_mpn".to_string(), "MPN-1".to_string());
        let item = ItemProjector::new(&prefixed, &store, now()).project(&product, None);
        assert_eq!(item.gtin.as_deref(), Some("123"));
        assert_eq!(item.mpn.as_deref(), Some("MPN-1"));

        let plain = FeedSettings::default();
        product.meta.clear();
        let item = ItemProjector::new(&plain, &store, now()).project(&product, None);
        assert_eq!(item.mpn, None);
    }

    #[test]
    fn shipping_and_tax_blocks() {
        let store = store();
        let product = simple();

        let country_only = settings(json!({ "shipping_country": "GB" }));
        let item = ItemProjector::new(&country_only, &store, now()).project(&product, None);
        assert_eq!(item.shipping, None);

        let full = settings(json!({
            "shipping_country": "GB",
            "shipping_price": "4.5",
            "shipping_service": "Standard",
            "tax_rate": "20",
        }));
        let item = ItemProjector::new(&full, &store, now()).project(&product, None);
        assert_eq!(
            item.shipping,
            Some(ShippingBlock {
                country: "GB".to_string(),
                price: "4.50 USD".to_string(),
                service: Some("Standard".to_string()),
            })
        );
        assert_eq!(
            item.tax,
            Some(TaxBlock {
                country: "GB".to_string(),
                rate: "20".to_string(),
            })
        );

        let tax_only = settings(json!({ "tax_rate": "7.5" }));
        let item = ItemProjector::new(&tax_only, &store, now()).project(&product, None);
        assert_eq!(item.tax.map(|tax| tax.country), Some("US".to_string()));
    }

    #[test]
    fn description_strips_markup_without_merging_words() {
        let cleaned = clean_description("<p>Hello</p><p>World</p>", true);
        assert_eq!(cleaned, "Hello World");

        assert_eq!(clean_description("Line<br/>break", true), "Line break");
        assert_eq!(clean_description("One<p>Two", true), "One Two");
        assert_eq!(clean_description("<b>bold</b>text", true), "bold text");
        assert_eq!(clean_description("a <em>b</em>  \n c", true), "a b c");

        let cleaned = clean_description("Hi<script>alert(1)</script> there<style>p{}</style>", true);
        assert_eq!(cleaned, "Hi there");
    }

    #[test]
    fn shortcode_toggle_is_honoured() {
        let raw = r#"[caption id="1"]Pretty[/caption] mug [gallery ids="1,2"]"#;
        assert_eq!(clean_description(raw, true), "Pretty mug");
        assert_eq!(clean_description(raw, false), raw);
    }

    #[test]
    fn bracketed_words_are_not_shortcodes() {
        assert_eq!(
            clean_description("Available in [XL] only", true),
            "Available in [XL] only"
        );
        assert_eq!(clean_description("Sizes [S/M]", true), "Sizes [S/M]");
        assert_eq!(clean_description("[note]Hand wash[/note] only", true), "Hand wash only");
        assert_eq!(clean_description("Mug [product_badge/] here", true), "Mug here");
    }

    #[test]
    fn description_is_capped_by_characters() {
        let long = "é".repeat(MAX_DESCRIPTION_CHARS + 100);
        let cleaned = clean_description(&long, true);
        assert_eq!(cleaned.chars().count(), MAX_DESCRIPTION_CHARS);

        let short = "short";
        assert_eq!(clean_description(short, true), "short");
    }

    #[test]
    fn money_rounds_half_away_from_zero() {
        assert_eq!(format_money(Decimal::new(12345, 3), "EUR"), "12.35 EUR");
        assert_eq!(format_money(Decimal::new(7, 0), "USD"), "7.00 USD");
    }

    #[test]
    fn link_falls_back_for_unparseable_permalinks() {
        let (mut parent, variation) = shirt_and_variation();
        parent.permalink = "/product/shirt?ref=feed".to_string();
        assert_eq!(
            link(&variation, Some(&parent)),
            "/product/shirt?ref=feed&attribute_pa_color=red&attribute_pa_size=m"
        );
    }
}
