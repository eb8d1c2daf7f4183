use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::extract::{StockSignals, VariantStock};
use crate::models::{StockState, VariantAvailability};

/// Outcome of stock arbitration for one page.
#[derive(Debug, Clone)]
pub struct StockDetection {
    pub in_stock: Option<bool>,
    pub stock_state: StockState,
    pub variant_stock: Vec<VariantStock>,
    pub signals: StockSignals,
}

/// Weighted phrase and markup scanner that arbitrates conflicting stock
/// signals. Text phrases, schema.org availability, purchase CTAs, and
/// embedded JSON inventory flags each feed two counters; a fixed precedence
/// ladder turns the counters into a verdict.
pub struct StockDetector {
    out_patterns: Vec<(Regex, f64)>,
    in_patterns: Vec<(Regex, f64)>,
    cta_regex: Regex,
    embedded_out: Vec<Regex>,
    embedded_in: Vec<Regex>,
}

const MAX_VARIANTS: usize = 8;

impl Default for StockDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl StockDetector {
    pub fn new() -> Self {
        let pattern = |p: &str| Regex::new(&format!("(?i){p}")).unwrap();

        StockDetector {
            out_patterns: vec![
                (pattern(r"out of stock|sold out"), 2.0),
                (pattern(r"temporarily out of stock"), 1.6),
                (pattern(r"currently unavailable"), 1.4),
                (pattern(r"back[- ]?ordered"), 1.2),
                (pattern(r"pre[- ]?order"), 0.8),
                (pattern(r"unavailable"), 0.5),
            ],
            in_patterns: vec![
                (pattern(r"add to cart|buy now"), 2.1),
                (pattern(r"in stock"), 1.5),
                (pattern(r"available now|ready to ship|ships today"), 1.1),
            ],
            cta_regex: pattern(r"add\s+to\s+(cart|bag|basket)|buy\s+now|buy\s+it\s+now"),
            embedded_out: vec![
                pattern(r#"["']?isSoldOut["']?\s*:\s*true"#),
                pattern(r#"["']?availability["']?\s*:\s*["'][^"']*OutOfStock"#),
                pattern(r#"["']?outOfStockMsg["']?\s*:\s*["']"#),
            ],
            embedded_in: vec![
                pattern(r#"["']?isSoldOut["']?\s*:\s*false"#),
                pattern(r#"["']?availability["']?\s*:\s*["'][^"']*InStock"#),
            ],
        }
    }

    /// Run the full arbitration. `extra_variants` carries per-variant
    /// availability recovered from structured data (JSON-LD offers); DOM
    /// variants are merged in and the combined list deduplicated.
    pub fn detect(&self, document: &Html, extra_variants: Vec<VariantStock>) -> StockDetection {
        let mut signals = StockSignals::default();

        let body_text = visible_text(document);
        let scoped_text = stock_scoped_text(document);

        self.score_phrases(&body_text, &mut signals);
        self.score_phrases(&scoped_text, &mut signals);
        self.score_schema_availability(document, &mut signals);
        self.score_ctas(document, &mut signals);
        self.score_embedded_json(document, &mut signals);

        let page_state = self.arbitrate(&signals);

        let mut variants = extra_variants;
        variants.extend(self.extract_dom_variants(document));
        let variants = dedupe_variants(variants);

        let stock_state = merge_with_variants(page_state, &variants);

        StockDetection {
            in_stock: stock_state.in_stock(),
            stock_state,
            variant_stock: variants,
            signals,
        }
    }

    fn score_phrases(&self, text: &str, signals: &mut StockSignals) {
        for (regex, weight) in &self.out_patterns {
            let matches = regex.find_iter(text).count().min(3);
            signals.out_score += matches as f64 * weight;
        }
        for (regex, weight) in &self.in_patterns {
            let matches = regex.find_iter(text).count().min(3);
            signals.in_score += matches as f64 * weight;
        }
    }

    fn score_schema_availability(&self, document: &Html, signals: &mut StockSignals) {
        let selector = Selector::parse("[itemprop=\"availability\"]").unwrap();
        for element in document.select(&selector) {
            let value = element
                .value()
                .attr("href")
                .or_else(|| element.value().attr("content"))
                .unwrap_or_default();
            if value.contains("InStock") {
                signals.explicit_in = true;
                signals.in_score += 3.0;
            } else if value.contains("OutOfStock") || value.contains("SoldOut") {
                signals.explicit_out = true;
                signals.out_score += 3.0;
            }
        }
    }

    fn score_ctas(&self, document: &Html, signals: &mut StockSignals) {
        let selector =
            Selector::parse("button, input[type=\"submit\"], a[role=\"button\"]").unwrap();

        for element in document.select(&selector) {
            if !is_visible(element) || inside_chrome(element) {
                continue;
            }

            let label = cta_label(element);
            if !self.cta_regex.is_match(&label) {
                continue;
            }

            if is_disabled(element) {
                signals.disabled_cta += 1;
            } else {
                signals.enabled_cta += 1;
            }
        }

        // An active buy button is the strongest on-page purchase signal
        if signals.enabled_cta > 0 {
            signals.in_score += 3.0 + signals.enabled_cta.min(2) as f64;
        }
        if signals.disabled_cta > 0 {
            signals.out_score += 1.0 + signals.disabled_cta.min(2) as f64;
        }
    }

    fn score_embedded_json(&self, document: &Html, signals: &mut StockSignals) {
        let selector = Selector::parse("script").unwrap();
        let mut out_count = 0usize;
        let mut in_count = 0usize;

        for script in document.select(&selector) {
            let text: String = script.text().collect();
            for regex in &self.embedded_out {
                out_count += regex.find_iter(&text).count();
            }
            for regex in &self.embedded_in {
                in_count += regex.find_iter(&text).count();
            }
        }

        signals.embedded_out = out_count as u32;
        signals.embedded_in = in_count as u32;
        signals.out_score += out_count.min(8) as f64 * 1.6;
        signals.in_score += in_count.min(8) as f64 * 1.2;
    }

    /// Precedence ladder over the accumulated signals. Ordering matters:
    /// explicit markup beats embedded JSON beats an active CTA beats the
    /// phrase-score margins.
    fn arbitrate(&self, s: &StockSignals) -> StockState {
        if s.explicit_in && !s.explicit_out {
            return StockState::InStock;
        }
        if s.explicit_out && !s.explicit_in && s.enabled_cta == 0 {
            return StockState::OutOfStock;
        }
        if s.embedded_out > 0 && s.embedded_in == 0 && s.enabled_cta == 0 {
            return StockState::OutOfStock;
        }
        if s.enabled_cta > 0 && s.in_score >= s.out_score - 2.0 {
            return StockState::InStock;
        }
        if s.out_score >= s.in_score + 3.0 && s.out_score >= 3.0 {
            return StockState::OutOfStock;
        }
        if s.in_score >= s.out_score + 2.0 && s.in_score >= 2.0 {
            return StockState::InStock;
        }
        StockState::Unknown
    }

    fn extract_dom_variants(&self, document: &Html) -> Vec<VariantStock> {
        let selectors = [
            "select option",
            "[data-size], [data-model], [data-variant], [data-option]",
            "[class*=\"variant\"], [class*=\"swatch\"], [class*=\"size\"], [class*=\"model\"]",
        ];

        let mut variants = Vec::new();
        for selector_str in selectors {
            let selector = Selector::parse(selector_str).unwrap();
            for element in document.select(&selector) {
                let text: String = element.text().collect::<Vec<_>>().join(" ");
                let Some(label) = sanitize_variant_label(&text) else {
                    continue;
                };

                let stock = if is_disabled(element) {
                    VariantAvailability::Out
                } else {
                    classify_availability_text(&text)
                };

                variants.push(VariantStock { label, stock });
            }
        }
        variants
    }
}

/// Page-level state corrected by per-variant counts: a mixed variant list
/// always wins as PARTIAL; otherwise variants only speak when they agree
/// with the page or the page has no opinion.
fn merge_with_variants(page_state: StockState, variants: &[VariantStock]) -> StockState {
    let known_in = variants
        .iter()
        .filter(|v| v.stock == VariantAvailability::In)
        .count();
    let known_out = variants
        .iter()
        .filter(|v| v.stock == VariantAvailability::Out)
        .count();

    let variant_state = if known_in > 0 && known_out > 0 {
        StockState::Partial
    } else if known_in > 0 {
        StockState::InStock
    } else if known_out > 0 {
        StockState::OutOfStock
    } else {
        StockState::Unknown
    };

    if variant_state == StockState::Partial {
        return StockState::Partial;
    }
    if variant_state == page_state {
        return page_state;
    }
    if page_state == StockState::Unknown {
        return variant_state;
    }
    page_state
}

pub fn classify_availability_text(text: &str) -> VariantAvailability {
    let lower = text.to_lowercase();
    if lower.contains("out of stock")
        || lower.contains("sold out")
        || lower.contains("unavailable")
    {
        VariantAvailability::Out
    } else if lower.contains("in stock") || lower.contains("available") {
        VariantAvailability::In
    } else {
        VariantAvailability::Unknown
    }
}

/// Trim a raw variant label to something worth persisting, or reject it.
pub fn sanitize_variant_label(raw: &str) -> Option<String> {
    let mut label = raw.trim().to_string();

    for token in [
        "out of stock",
        "sold out",
        "unavailable",
        "in stock",
        "available",
    ] {
        let lower = label.to_lowercase();
        // Byte offsets only line up when lowercasing kept the length
        if lower.len() == label.len() {
            if let Some(pos) = lower.find(token) {
                label.replace_range(pos..pos + token.len(), "");
            }
        }
    }

    let label = label
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '–' | ':' | '(' | ')'))
        .to_string();

    let lower = label.to_lowercase();
    if matches!(lower.as_str(), "select" | "size" | "default title") || lower.starts_with("select ")
    {
        return None;
    }
    if label.is_empty() || label.chars().count() > 64 {
        return None;
    }
    if !label.chars().any(|c| c.is_alphanumeric()) {
        return None;
    }

    Some(label)
}

pub fn dedupe_variants(variants: Vec<VariantStock>) -> Vec<VariantStock> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for variant in variants {
        let key = (variant.label.to_lowercase(), variant.stock);
        if seen.insert(key) {
            out.push(variant);
            if out.len() >= MAX_VARIANTS {
                break;
            }
        }
    }
    out
}

fn is_disabled(element: ElementRef) -> bool {
    element.value().attr("disabled").is_some()
        || element.value().attr("aria-disabled") == Some("true")
}

fn is_visible(element: ElementRef) -> bool {
    element.value().attr("hidden").is_none() && element.value().attr("aria-hidden") != Some("true")
}

/// True when the element sits inside page chrome (header, nav, footer) and
/// is therefore not a purchase control for this product.
fn inside_chrome(element: ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|e| matches!(e.name(), "header" | "nav" | "footer"))
            .unwrap_or(false)
    })
}

fn cta_label(element: ElementRef) -> String {
    let text: String = element.text().collect::<Vec<_>>().join(" ");
    if !text.trim().is_empty() {
        return text;
    }
    element
        .value()
        .attr("value")
        .or_else(|| element.value().attr("aria-label"))
        .unwrap_or_default()
        .to_string()
}

/// Text content with script/style/noscript subtrees excluded, so inventory
/// JSON inside scripts cannot masquerade as page copy.
pub fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    for node in document.root_element().descendants() {
        if let Some(text) = node.value().as_text() {
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .map(|e| matches!(e.name(), "script" | "style" | "noscript"))
                    .unwrap_or(false)
            });
            if !hidden {
                out.push_str(text);
                out.push(' ');
            }
        }
    }
    out
}

/// Concatenated text of elements whose class or id mentions stock or
/// availability; phrases found there are scored a second time.
fn stock_scoped_text(document: &Html) -> String {
    let selector = Selector::parse(
        "[class*=\"stock\"], [id*=\"stock\"], [class*=\"availability\"], [id*=\"availability\"]",
    )
    .unwrap();

    let mut out = String::new();
    for element in document.select(&selector) {
        for piece in element.text() {
            out.push_str(piece);
            out.push(' ');
        }
    }
    out
}
