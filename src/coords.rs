/// Normalizes a locale-variant numeric string into a finite float.
///
/// Handles both `1.234,56` (European) and `1,234.56` (Anglo) styles without
/// configuration: when both separators appear, the rightmost one is taken as
/// the decimal point and the other stripped as a thousands separator. A lone
/// comma is a decimal point when exactly one appears with at most 3 digits
/// after it (`12,34` -> 12.34), otherwise a thousands separator
/// (`1,234,567` -> 1234567).
pub fn normalize_coordinate(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (Some(comma), None) => {
            let trailing_digits = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() == 1 && trailing_digits <= 3 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        _ => cleaned,
    };

    let value: f64 = normalized.parse().ok()?;
    value.is_finite().then_some(value)
}
