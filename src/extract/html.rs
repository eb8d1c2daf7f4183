use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use std::str::FromStr;

use crate::extract::name::normalize_product_name;
use crate::extract::stock::{sanitize_variant_label, visible_text, StockDetector};
use crate::extract::{content_hash, Candidate, Evidence, ExtractResult, VariantStock};
use crate::models::{ExtractionMethod, StockState, VariantAvailability};
use crate::price_parser::PriceParser;

/// Window around an embedded `defaultPrice` that must mention the product
/// for the match to count.
const DEFAULT_PRICE_CONTEXT: usize = 240;

/// Static-HTML extractor. Every source contributes scored candidates to a
/// single pool; the result is a fold over that pool plus an independent
/// stock detection pass.
pub struct HtmlExtractor {
    price_parser: PriceParser,
    stock: StockDetector,
    currency_regex: Regex,
    default_price_regex: Regex,
    sku_price_regex: Regex,
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlExtractor {
    pub fn new() -> Self {
        HtmlExtractor {
            price_parser: PriceParser::new(),
            stock: StockDetector::new(),
            currency_regex: Regex::new(r"[$€£]\s?\d[\d., ]*").unwrap(),
            default_price_regex: Regex::new(
                r#"["']?defaultPrice["']?\s*:\s*["']?(\d+(?:\.\d{1,2})?)"#,
            )
            .unwrap(),
            sku_price_regex: Regex::new(r#"["']?price["']?\s*:\s*["']?(\d+(?:\.\d{1,2})?)"#)
                .unwrap(),
        }
    }

    pub fn extract(&self, html: &str, url: &str) -> ExtractResult {
        let document = Html::parse_document(html);

        let title = first_text(&document, "title");
        let meta_description = attr_value(&document, "meta[name=\"description\"]", "content");

        let mut candidates = Vec::new();
        let mut jsonld_variants = Vec::new();

        self.collect_jsonld(&document, &mut candidates, &mut jsonld_variants);
        self.collect_embedded_scripts(&document, &mut candidates);
        self.collect_meta_tags(&document, &mut candidates);
        self.collect_dom_prices(&document, &mut candidates);
        self.collect_body_scan(&document, &mut candidates);

        candidates.sort_by(|a, b| {
            b.adjusted_score()
                .partial_cmp(&a.adjusted_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut best_score = candidates
            .first()
            .map(|c| c.adjusted_score())
            .unwrap_or(0.0);

        // Two near-tied candidates disagreeing on price make the winner
        // untrustworthy; drop it toward the ambiguity floor
        if let (Some(top), Some(second)) = (candidates.first(), candidates.get(1)) {
            let disagree = matches!(
                (top.price_cents, second.price_cents),
                (Some(a), Some(b)) if a != b
            );
            if disagree && second.adjusted_score() > top.adjusted_score() - 0.05 {
                best_score = (best_score - 0.10).max(0.50);
            }
        }

        let detection = self.stock.detect(&document, jsonld_variants);

        let confidence = if detection.stock_state != StockState::Unknown {
            let floor = if detection.stock_state == StockState::Partial {
                0.80
            } else {
                0.75
            };
            best_score.max(floor)
        } else {
            best_score
        };

        let price_cents = candidates.iter().find_map(|c| c.price_cents);
        let raw_name = candidates
            .iter()
            .find_map(|c| c.name.clone())
            .or_else(|| attr_value(&document, "meta[property=\"og:title\"]", "content"))
            .or_else(|| title.clone())
            .or_else(|| first_text(&document, "h1"));
        let product_name = raw_name
            .map(|n| normalize_product_name(&n))
            .filter(|n| !n.is_empty());

        tracing::debug!(
            url,
            candidates = candidates.len(),
            confidence,
            stock = ?detection.stock_state,
            "static extraction finished"
        );

        let evidence = Evidence {
            title,
            meta_description,
            candidates: candidates.into_iter().take(12).collect(),
            stock_signals: detection.signals,
            variant_stock: detection.variant_stock.clone(),
            final_url: None,
        };

        ExtractResult {
            product_name,
            price_cents,
            in_stock: detection.in_stock,
            stock_state: detection.stock_state,
            variant_stock: detection.variant_stock,
            confidence,
            method: ExtractionMethod::Static,
            evidence,
            content_hash: content_hash(html),
        }
    }

    fn collect_jsonld(
        &self,
        document: &Html,
        candidates: &mut Vec<Candidate>,
        variants: &mut Vec<VariantStock>,
    ) {
        let selector = Selector::parse("script[type=\"application/ld+json\"]").unwrap();

        for script in document.select(&selector) {
            let text: String = script.text().collect();
            // Malformed JSON-LD blocks are common in the wild; skip quietly
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                continue;
            };

            let mut products = Vec::new();
            collect_products(&value, &mut products);

            for product in products {
                let name = product
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());

                let offers = offers_of(product);
                let price = offers.iter().find_map(|o| self.json_price(o));
                let has_availability = offers
                    .iter()
                    .any(|o| o.get("availability").map_or(false, |a| a.is_string()));

                if offers.len() > 1 {
                    for offer in &offers {
                        if let Some(variant) = offer_variant(offer) {
                            variants.push(variant);
                        }
                    }
                }

                let score = if price.is_some() {
                    0.95
                } else if has_availability {
                    0.88
                } else {
                    continue;
                };

                candidates.push(Candidate {
                    source: "json_ld".to_string(),
                    name,
                    price_cents: price,
                    score,
                    evidence: "script[type=application/ld+json] @type=Product".to_string(),
                });
            }
        }
    }

    fn collect_embedded_scripts(&self, document: &Html, candidates: &mut Vec<Candidate>) {
        let selector = Selector::parse("script:not([type=\"application/ld+json\"])").unwrap();

        for script in document.select(&selector) {
            let text: String = script.text().collect();

            if let Some(idx) = text.find("productSku") {
                let window_end = floor_char_boundary(&text, idx + 600);
                let window = &text[idx..window_end];
                if let Some(caps) = self.sku_price_regex.captures(window) {
                    if let Some(cents) = decimal_cents(&caps[1]) {
                        candidates.push(Candidate {
                            source: "product_sku".to_string(),
                            name: None,
                            price_cents: Some(cents),
                            score: 0.92,
                            evidence: format!("productSku price={}", &caps[1]),
                        });
                    }
                }
            }

            for caps in self.default_price_regex.captures_iter(&text) {
                let m = caps.get(0).unwrap();
                let start =
                    floor_char_boundary(&text, m.start().saturating_sub(DEFAULT_PRICE_CONTEXT));
                let end = floor_char_boundary(&text, m.end() + DEFAULT_PRICE_CONTEXT);
                let context = text[start..end].to_lowercase();
                if !context.contains("product") && !context.contains("sku") {
                    continue;
                }
                if let Some(cents) = decimal_cents(&caps[1]) {
                    candidates.push(Candidate {
                        source: "default_price".to_string(),
                        name: None,
                        price_cents: Some(cents),
                        score: 0.86,
                        evidence: format!("defaultPrice={}", &caps[1]),
                    });
                }
            }
        }
    }

    fn collect_meta_tags(&self, document: &Html, candidates: &mut Vec<Candidate>) {
        let sources = [
            ("meta[property=\"og:price:amount\"]", "og:price:amount"),
            (
                "meta[property=\"product:price:amount\"]",
                "product:price:amount",
            ),
            ("meta[itemprop=\"price\"]", "itemprop=price"),
        ];

        for (selector_str, label) in sources {
            let selector = Selector::parse(selector_str).unwrap();
            for element in document.select(&selector) {
                let Some(content) = element.value().attr("content") else {
                    continue;
                };
                let Some(parsed) = self.price_parser.parse(content) else {
                    continue;
                };
                candidates.push(Candidate {
                    source: "meta".to_string(),
                    name: None,
                    price_cents: Some(parsed.price_cents),
                    score: 0.82,
                    evidence: format!("{label}={content}"),
                });
            }
        }
    }

    fn collect_dom_prices(&self, document: &Html, candidates: &mut Vec<Candidate>) {
        let selector = Selector::parse(
            "[class*=\"price\"], [id*=\"price\"], [data-price], [itemprop=\"price\"], .product-price, .price",
        )
        .unwrap();

        for element in document.select(&selector).take(40) {
            let from_attr = element
                .value()
                .attr("data-price")
                .and_then(|v| self.price_parser.parse(v));
            let text: String = element.text().collect::<Vec<_>>().join(" ");
            let Some(parsed) = from_attr.or_else(|| self.price_parser.parse(&text)) else {
                continue;
            };

            let snippet: String = text.trim().chars().take(80).collect();
            candidates.push(Candidate {
                source: "dom".to_string(),
                name: None,
                price_cents: Some(parsed.price_cents),
                score: 0.72,
                evidence: snippet,
            });
        }
    }

    fn collect_body_scan(&self, document: &Html, candidates: &mut Vec<Candidate>) {
        let body = visible_text(document);
        let Some(m) = self.currency_regex.find(&body) else {
            return;
        };
        let Some(parsed) = self.price_parser.parse(m.as_str()) else {
            return;
        };

        candidates.push(Candidate {
            source: "body_scan".to_string(),
            name: None,
            price_cents: Some(parsed.price_cents),
            score: 0.60,
            evidence: m.as_str().trim().to_string(),
        });
    }

    fn json_price(&self, offer: &serde_json::Value) -> Option<i64> {
        let value = offer.get("price").or_else(|| offer.get("lowPrice"))?;
        match value {
            serde_json::Value::Number(n) => {
                let cents = (n.as_f64()? * 100.0).round();
                (cents > 0.0 && cents.is_finite()).then_some(cents as i64)
            }
            serde_json::Value::String(s) => decimal_cents(s),
            _ => None,
        }
    }
}

/// Largest index `<= at` that lands on a UTF-8 character boundary.
fn floor_char_boundary(text: &str, at: usize) -> usize {
    if at >= text.len() {
        return text.len();
    }
    let mut i = at;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn decimal_cents(text: &str) -> Option<i64> {
    let value = Decimal::from_str(text.trim()).ok()?;
    if value <= Decimal::ZERO {
        return None;
    }
    (value * Decimal::from(100)).round().to_i64()
}

/// Depth-first search for `@type: Product` nodes, descending into arrays
/// and `@graph` containers.
fn collect_products<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a serde_json::Value>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_products(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if is_product_type(map.get("@type")) {
                out.push(value);
            }
            if let Some(graph) = map.get("@graph") {
                collect_products(graph, out);
            }
        }
        _ => {}
    }
}

fn is_product_type(type_value: Option<&serde_json::Value>) -> bool {
    match type_value {
        Some(serde_json::Value::String(s)) => s == "Product",
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .any(|v| v.as_str().map_or(false, |s| s == "Product")),
        _ => false,
    }
}

fn offers_of(product: &serde_json::Value) -> Vec<&serde_json::Value> {
    match product.get("offers") {
        Some(serde_json::Value::Array(items)) => items.iter().collect(),
        Some(offer @ serde_json::Value::Object(_)) => vec![offer],
        _ => Vec::new(),
    }
}

fn offer_variant(offer: &serde_json::Value) -> Option<VariantStock> {
    let raw_label = offer
        .get("name")
        .or_else(|| offer.get("sku"))
        .and_then(|v| v.as_str())?;
    let label = sanitize_variant_label(raw_label)?;

    let stock = match offer.get("availability").and_then(|v| v.as_str()) {
        Some(a) if a.contains("InStock") => VariantAvailability::In,
        Some(a) if a.contains("OutOfStock") || a.contains("SoldOut") => VariantAvailability::Out,
        _ => VariantAvailability::Unknown,
    };

    Some(VariantStock { label, stock })
}

fn first_text(document: &Html, selector_str: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    document.select(&selector).next().map(|el| {
        el.text()
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    })
}

fn attr_value(document: &Html, selector_str: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.to_string())
}
