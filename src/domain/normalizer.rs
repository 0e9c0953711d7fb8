//! Engagement count normalization
//!
//! Sites render counts as `"1.2k"`, `"3M"`, `"1,234"` or placeholders like
//! `"•"` while votes are hidden. Normalization is lenient: anything that
//! cannot be read becomes 0 instead of failing the record.

const PLACEHOLDERS: &[&str] = &["", "N/A", "•"];

/// Convert a human-readable count into an integer, never failing.
pub fn normalize(raw: &str) -> u64 {
    let text = raw.trim();
    if PLACEHOLDERS.contains(&text) {
        return 0;
    }

    if let Some(prefix) = prefix_before(text, 'k') {
        return scale(prefix, 1_000.0);
    }
    if let Some(prefix) = prefix_before(text, 'm') {
        return scale(prefix, 1_000_000.0);
    }

    text.replace(',', "").parse::<u64>().unwrap_or(0)
}

/// Text in front of the first occurrence of `suffix` (either case)
fn prefix_before(text: &str, suffix: char) -> Option<&str> {
    text.find(|c: char| c.eq_ignore_ascii_case(&suffix))
        .map(|pos| text[..pos].trim())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale(prefix: &str, factor: f64) -> u64 {
    match prefix.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => (value * factor).trunc() as u64,
        _ => 0,
    }
}
