use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Result of parsing a price out of free text. Money leaves this module as
/// integer minor units; nothing downstream does arithmetic on the raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPrice {
    pub price_cents: i64,
    pub raw_number: Decimal,
}

/// Locale-robust price parser. Accepts `.`/`,`/space-separated numbers and
/// decides which separator is the decimal one from position and digit count.
pub struct PriceParser {
    token_regex: Regex,
}

impl Default for PriceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceParser {
    pub fn new() -> Self {
        // digits, optional separator-delimited digit triples, optional
        // two-digit decimal tail
        PriceParser {
            token_regex: Regex::new(r"\d+(?:[ .,]\d{3})*(?:[.,]\d{2})?").unwrap(),
        }
    }

    pub fn parse(&self, text: &str) -> Option<ParsedPrice> {
        let normalized: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let token = self.token_regex.find(&normalized)?.as_str();

        let value = Decimal::from_str(&normalize_token(token)).ok()?;
        if value <= Decimal::ZERO {
            return None;
        }

        let cents = (value * Decimal::from(100)).round().to_i64()?;
        Some(ParsedPrice {
            price_cents: cents,
            raw_number: value,
        })
    }
}

/// Rewrite a matched numeric token into plain `1234.56` form.
///
/// Separator rules: spaces are always thousands separators. When both `.`
/// and `,` appear, the later one is the decimal separator. A lone separator
/// is decimal only when exactly two digits trail it.
fn normalize_token(token: &str) -> String {
    let cleaned = token.replace(' ', "");
    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');

    match (has_dot, has_comma) {
        (true, true) => {
            let decimal = if cleaned.rfind('.') > cleaned.rfind(',') {
                '.'
            } else {
                ','
            };
            let thousands = if decimal == '.' { ',' } else { '.' };
            cleaned
                .replace(thousands, "")
                .replace(decimal, ".")
        }
        (true, false) => resolve_single_separator(&cleaned, '.'),
        (false, true) => resolve_single_separator(&cleaned, ','),
        (false, false) => cleaned,
    }
}

fn resolve_single_separator(token: &str, sep: char) -> String {
    let occurrences = token.matches(sep).count();
    let trailing_digits = token
        .rsplit(sep)
        .next()
        .map(str::len)
        .unwrap_or(0);

    if occurrences == 1 && trailing_digits == 2 {
        token.replace(sep, ".")
    } else {
        token.replace(sep, "")
    }
}
