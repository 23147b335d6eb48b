// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! RSS 2.0 serialization of projected feed items.

use std::borrow::Cow;
use std::io::Cursor;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::FeedError;
use crate::model::{FeedItem, StoreInfo};

pub const GOOGLE_BASE_NS: &str = "http://base.google.com/ns/1.0";

/// Streams a feed document item by item: `begin`, any number of `push`,
/// then `finish`.
pub struct FeedAssembler {
    writer: Writer<Cursor<Vec<u8>>>,
    title: String,
    link: String,
    description: String,
    items: usize,
}

impl FeedAssembler {
    pub fn new(store: &StoreInfo) -> Self {
        Self {
            writer: Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2),
            title: format!("{} - Facebook RSS Feed", store.name),
            link: store.home_url.clone(),
            description: format!("Product catalog for {}", store.name),
            items: 0,
        }
    }

    /// Write the XML declaration, the `rss` root and the channel metadata.
    pub fn begin(&mut self) -> Result<(), FeedError> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        rss.push_attribute(("xmlns:g", GOOGLE_BASE_NS));
        self.event(Event::Start(rss))?;
        self.event(Event::Start(BytesStart::new("channel")))?;

        let title = self.title.clone();
        let link = self.link.clone();
        let description = self.description.clone();
        self.text_element("title", &title)?;
        self.text_element("link", &link)?;
        self.text_element("description", &description)
    }

    pub fn push(&mut self, item: &FeedItem) -> Result<(), FeedError> {
        self.event(Event::Start(BytesStart::new("item")))?;

        self.cdata_element("title", &item.title)?;
        self.text_element("link", &item.link)?;
        self.cdata_element("description", &item.description)?;
        self.text_element("g:id", &item.id)?;
        self.optional("g:item_group_id", item.item_group_id.as_deref())?;
        self.text_element("g:price", &item.price)?;
        self.optional("g:sale_price", item.sale_price.as_deref())?;
        self.optional(
            "g:sale_price_effective_date",
            item.sale_price_effective_date.as_deref(),
        )?;
        self.text_element("g:availability", item.availability)?;
        self.text_element("g:condition", &item.condition)?;
        self.optional("g:brand", item.brand.as_deref())?;
        self.optional("g:image_link", item.image_link.as_deref())?;
        for url in &item.additional_image_links {
            self.text_element("g:additional_image_link", url)?;
        }
        self.optional("g:color", item.color.as_deref())?;
        self.optional("g:size", item.size.as_deref())?;
        self.optional("g:gtin", item.gtin.as_deref())?;
        self.optional("g:mpn", item.mpn.as_deref())?;
        self.optional("g:product_type", item.product_type.as_deref())?;

        if let Some(shipping) = &item.shipping {
            self.event(Event::Start(BytesStart::new("g:shipping")))?;
            self.text_element("g:country", &shipping.country)?;
            self.text_element("g:price", &shipping.price)?;
            self.optional("g:service", shipping.service.as_deref())?;
            self.event(Event::End(BytesEnd::new("g:shipping")))?;
        }

        if let Some(tax) = &item.tax {
            self.event(Event::Start(BytesStart::new("g:tax")))?;
            self.text_element("g:country", &tax.country)?;
            self.text_element("g:rate", &tax.rate)?;
            self.event(Event::End(BytesEnd::new("g:tax")))?;
        }

        self.event(Event::End(BytesEnd::new("item")))?;
        self.items += 1;
        Ok(())
    }

    pub fn items(&self) -> usize {
        self.items
    }

    /// Close the channel and return the finished document.
    pub fn finish(mut self) -> Result<String, FeedError> {
        self.event(Event::End(BytesEnd::new("channel")))?;
        self.event(Event::End(BytesEnd::new("rss")))?;

        let bytes = self.writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| FeedError::Xml(e.to_string()))
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), FeedError> {
        self.writer
            .write_event(event)
            .map_err(|e| FeedError::Xml(e.to_string()))
    }

    fn text_element(&mut self, name: &str, value: &str) -> Result<(), FeedError> {
        let value = xml_chars(value);
        self.event(Event::Start(BytesStart::new(name)))?;
        self.event(Event::Text(BytesText::new(&value)))?;
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn optional(&mut self, name: &str, value: Option<&str>) -> Result<(), FeedError> {
        match value {
            Some(value) => self.text_element(name, value),
            None => Ok(()),
        }
    }

    fn cdata_element(&mut self, name: &str, value: &str) -> Result<(), FeedError> {
        let value = xml_chars(value);
        self.event(Event::Start(BytesStart::new(name)))?;
        for section in cdata_sections(&value) {
            self.event(Event::CData(BytesCData::new(section)))?;
        }
        self.event(Event::End(BytesEnd::new(name)))
    }
}

/// Drop characters outside the XML 1.0 `Char` production. Neither escaping
/// nor CDATA can carry them.
fn xml_chars(value: &str) -> Cow<'_, str> {
    if value.chars().all(is_xml_char) {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(value.chars().filter(|c| is_xml_char(*c)).collect())
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r'
            | '\u{20}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}'
            | '\u{10000}'..='\u{10FFFF}'
    )
}

/// Split text so that no section contains the `]]>` terminator. The
/// terminator is broken between `]]` and `>`.
fn cdata_sections(value: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut rest = value;
    while let Some(pos) = rest.find("]]>") {
        sections.push(&rest[..pos + 2]);
        rest = &rest[pos + 2..];
    }
    sections.push(rest);
    sections
}
