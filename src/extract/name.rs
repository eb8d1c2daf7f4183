use regex::Regex;

/// Canonicalize a product name for cross-run comparison. Marketing tails
/// ("... with HEPA filter", "... for large rooms") are cut, and a detected
/// model code is re-appended so two phrasings of the same product collapse
/// to one name.
pub fn normalize_product_name(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    let mut trimmed = cut_marketing_tail(raw).trim().to_string();
    trimmed = trimmed.replace("Air Purifiers", "Air Purifier");

    if let Some(model) = model_hint(raw) {
        let stripped = model.strip_suffix("-P").unwrap_or(&model);
        if !trimmed.to_lowercase().contains(&stripped.to_lowercase()) {
            trimmed = format!("{} - {}", trimmed, stripped);
        }
    }

    trimmed
}

fn cut_marketing_tail(name: &str) -> &str {
    let mut cut = name.len();
    for marker in [" with ", " for ", ","] {
        if let Some(pos) = name.find(marker) {
            cut = cut.min(pos);
        }
    }
    &name[..cut]
}

/// Model hint: `Core 300S`-style series codes or bare alphanumeric model
/// numbers; the last match in the name wins.
fn model_hint(name: &str) -> Option<String> {
    let core = Regex::new(r"\b(Core)\s+([A-Z0-9-]{3,})\b").unwrap();
    let bare = Regex::new(r"\b[A-Z]+[0-9]{2,}[A-Z0-9-]*\b").unwrap();

    let mut best: Option<(usize, String)> = None;
    for caps in core.captures_iter(name) {
        let m = caps.get(0).unwrap();
        let hint = caps.get(2).unwrap().as_str().to_string();
        best = pick_later(best, m.start(), hint);
    }
    for m in bare.find_iter(name) {
        best = pick_later(best, m.start(), m.as_str().to_string());
    }
    best.map(|(_, hint)| hint)
}

fn pick_later(
    best: Option<(usize, String)>,
    start: usize,
    hint: String,
) -> Option<(usize, String)> {
    match best {
        Some((pos, _)) if pos > start => best,
        _ => Some((start, hint)),
    }
}
