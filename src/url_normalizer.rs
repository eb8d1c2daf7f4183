use url::Url;

use crate::utils::error::{AppError, Result};

/// Query parameter name prefixes that only carry tracking state. Matched
/// case-insensitively against the start of each name.
const TRACKING_PREFIXES: &[&str] = &["utm_", "fbclid", "gclid", "msclkid", "ref", "ref_", "source"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonicalized {
    pub url: String,
    pub host: String,
}

/// Canonicalize a product URL into the dedupe key: fragment stripped,
/// tracking parameters removed, remaining parameters sorted by name, and a
/// single trailing slash trimmed. Idempotent.
pub fn canonicalize(raw: &str) -> Result<Canonicalized> {
    let mut url = Url::parse(raw.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation("URL has no host".to_string()))?
        .to_lowercase();

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    // Stable sort keeps value order within a repeated name
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 {
        if let Some(trimmed) = path.strip_suffix('/') {
            url.set_path(trimmed);
        }
    }

    Ok(Canonicalized {
        url: url.to_string(),
        host,
    })
}

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_lowercase();
    TRACKING_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(raw: &str) -> String {
        canonicalize(raw).unwrap().url
    }

    #[test]
    fn test_strips_tracking_params() {
        assert_eq!(
            canon("https://shop.example.com/p/1?utm_source=news&utm_medium=email&id=5"),
            "https://shop.example.com/p/1?id=5"
        );
        assert_eq!(
            canon("https://shop.example.com/p/1?fbclid=abc&gclid=def&msclkid=ghi"),
            "https://shop.example.com/p/1"
        );
        assert_eq!(
            canon("https://shop.example.com/p/1?REF=homepage&Source=banner"),
            "https://shop.example.com/p/1"
        );
    }

    #[test]
    fn test_strips_fragment() {
        assert_eq!(
            canon("https://example.com/product#reviews"),
            "https://example.com/product"
        );
    }

    #[test]
    fn test_sorts_params_preserving_repeat_order() {
        assert_eq!(
            canon("https://example.com/p?b=2&a=1&b=1"),
            "https://example.com/p?a=1&b=2&b=1"
        );
    }

    #[test]
    fn test_trailing_slash() {
        assert_eq!(
            canon("https://example.com/products/widget/"),
            "https://example.com/products/widget"
        );
        // Root path stays as-is
        assert_eq!(canon("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "https://shop.example.com/p/1?utm_source=x&b=2&a=1#frag",
            "https://example.com/products/widget/",
            "https://example.com/",
        ];
        for input in inputs {
            let once = canon(input);
            assert_eq!(canon(&once), once, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_host_lowercased() {
        let result = canonicalize("https://Shop.Example.COM/p/1").unwrap();
        assert_eq!(result.host, "shop.example.com");
    }

    #[test]
    fn test_rejects_non_http() {
        assert!(canonicalize("ftp://example.com/file").is_err());
        assert!(canonicalize("not a url").is_err());
    }
}
