// Utility helpers for parsing, gap filling and number formatting.
//
// This module centralizes the "dirty" CSV/number/date handling so the
// rest of the code can assume typed values.
use chrono::NaiveDate;
use num_format::{Locale, ToFormattedString};

/// Day-first formats tried after ISO. ISO dates are unambiguous and are
/// what the OWID export ships, so they always win.
const DAY_FIRST_FORMATS: [&str; 4] = ["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y"];

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in CSV exports.
///
/// - Accepts `Option<&str>` so callers can pass through optional fields.
/// - Trims whitespace and strips thousands separators.
/// - Returns `None` for empty cells, text, `NaN` and infinities.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replace(',', "");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_text(s: Option<&str>) -> Option<String> {
    let s = s?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

pub fn parse_date_dayfirst(s: Option<&str>) -> Option<NaiveDate> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    DAY_FIRST_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Carry the last seen value forward over gaps.
pub fn forward_fill(values: &mut [Option<f64>]) {
    let mut last = None;
    for v in values.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => *v = last,
        }
    }
}

/// Fill gaps with the next seen value. Trailing gaps stay empty.
pub fn back_fill(values: &mut [Option<f64>]) {
    let mut next = None;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
}

pub fn average(v: &[f64]) -> f64 {
    // Standard arithmetic mean; returns 0 for an empty slice to avoid NaNs.
    if v.is_empty() {
        return 0.0;
    }
    let sum: f64 = v.iter().copied().sum();
    sum / v.len() as f64
}

/// Population standard deviation.
pub fn std_dev(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    let mean = average(v);
    let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64;
    var.sqrt()
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Fixed decimals with locale-aware thousands separators, e.g.
    // `1,234,567.89`.
    if !n.is_finite() {
        return "n/a".to_string();
    }
    let neg = n.is_sign_negative() && n != 0.0;
    let s = format!("{:.*}", decimals, n.abs());
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(&Locale::en)
}

/// Signed integer with separators, the way metric deltas are shown
/// (`+1,234`, `-56`, `+0`).
pub fn format_signed(n: i64) -> String {
    if n < 0 {
        format!("-{}", format_int(n.unsigned_abs()))
    } else {
        format!("+{}", format_int(n))
    }
}

pub fn format_opt(v: Option<f64>, decimals: usize) -> String {
    v.map_or_else(|| "-".to_string(), |x| format_number(x, decimals))
}

/// Truncate to at most `max_chars` characters without splitting a char.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_and_day_first_dates() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4).unwrap();
        assert_eq!(parse_date_dayfirst(Some("2021-03-04")), Some(expected));
        assert_eq!(parse_date_dayfirst(Some("04/03/2021")), Some(expected));
        assert_eq!(parse_date_dayfirst(Some("04-03-2021")), Some(expected));
        assert_eq!(parse_date_dayfirst(Some("04.03.2021")), Some(expected));
        assert_eq!(parse_date_dayfirst(Some("31/13/2021")), None);
        assert_eq!(parse_date_dayfirst(Some("  ")), None);
        assert_eq!(parse_date_dayfirst(None), None);
    }

    #[test]
    fn numeric_cells_are_forgiving() {
        assert_eq!(parse_f64_safe(Some(" 1,234.5 ")), Some(1234.5));
        assert_eq!(parse_f64_safe(Some("2.5e3")), Some(2500.0));
        assert_eq!(parse_f64_safe(Some("n/a")), None);
        assert_eq!(parse_f64_safe(Some("NaN")), None);
        assert_eq!(parse_f64_safe(Some("inf")), None);
        assert_eq!(parse_f64_safe(Some("")), None);
    }

    #[test]
    fn forward_then_back_fill_closes_every_gap() {
        let mut v = vec![None, Some(1.0), None, None, Some(4.0), None];
        forward_fill(&mut v);
        assert_eq!(v, vec![None, Some(1.0), Some(1.0), Some(1.0), Some(4.0), Some(4.0)]);
        back_fill(&mut v);
        assert_eq!(v[0], Some(1.0));
        assert!(v.iter().all(Option::is_some));
    }

    #[test]
    fn back_fill_leaves_trailing_gaps() {
        let mut v = vec![None, Some(2.0), None];
        back_fill(&mut v);
        assert_eq!(v, vec![Some(2.0), Some(2.0), None]);
    }

    #[test]
    fn formats_numbers_with_separators() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(-42.0, 1), "-42.0");
        assert_eq!(format_number(f64::NAN, 2), "n/a");
        assert_eq!(format_signed(1500), "+1,500");
        assert_eq!(format_signed(-7), "-7");
        assert_eq!(format_signed(0), "+0");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
