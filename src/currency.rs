// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Parsing and formatting of monetary display strings
//!
//! Valuations are stored exactly as the model or the expert wrote them
//! ("150,00 €", "€1.234,50", "$ 80.00", "ca. 45 EUR"). Sums and sorting
//! need numbers, and this module is the only place that turns one into
//! the other.
//!
//! Rules applied by [`parse_amount`]:
//!
//! 1. Everything except digits, `.`, `,` and a leading `-` is dropped, so
//!    currency symbols, codes and words disappear. A separator not followed
//!    by a digit is dropped too (`ca. 45`, `45 EUR.`).
//! 2. If both `.` and `,` occur, whichever comes last is the decimal
//!    separator and the other is a thousands separator
//!    (`1.234,56` and `1,234.56` are both 1234.56).
//! 3. If only one kind occurs once, it is the decimal separator
//!    (`12,5` and `12.5` are both 12.5).
//! 4. If only one kind occurs several times, it is a thousands separator
//!    (`1.000.000` is one million).
//! 5. Anything left unparseable counts as zero.

/// Parse a display string into a numeric amount
pub fn parse_amount(input: &str) -> f64 {
    let trimmed = input.trim();
    let negative = trimmed
        .chars()
        .find(|c| c.is_ascii_digit() || *c == '-')
        .is_some_and(|c| c == '-');

    // A separator only counts when a digit follows it, so "ca. 45" and a
    // sentence-ending "45 EUR." lose their dots while ",50" keeps its comma
    let mut kept = String::with_capacity(trimmed.len());
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        let next_is_digit = chars.peek().is_some_and(|n| n.is_ascii_digit());
        if c.is_ascii_digit() || ((c == '.' || c == ',') && next_is_digit) {
            kept.push(c);
        }
    }

    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return 0.0;
    }

    let last_dot = kept.rfind('.');
    let last_comma = kept.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            if dot > comma {
                kept.replace(',', "")
            } else {
                kept.replace('.', "").replace(',', ".")
            }
        }
        (None, Some(_)) => single_separator(&kept, ','),
        (Some(_), None) => single_separator(&kept, '.'),
        (None, None) => kept,
    };

    let normalized = if normalized.starts_with('.') {
        format!("0{}", normalized)
    } else {
        normalized
    };
    let value = normalized.parse::<f64>().unwrap_or(0.0);
    if !value.is_finite() {
        return 0.0;
    }

    if negative {
        -value
    } else {
        value
    }
}

fn single_separator(s: &str, sep: char) -> String {
    if s.matches(sep).count() == 1 {
        s.replace(sep, ".")
    } else {
        s.replace(sep, "")
    }
}

/// Format an amount the way the dashboard shows totals: `€1.234,50`
pub fn format_eur(amount: f64) -> String {
    let cents = (amount * 100.0).round() as i64;
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let whole = (cents / 100).to_string();
    let frac = cents % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{}€{},{:02}", sign, grouped, frac)
}

/// Sum a set of display strings
pub fn sum_amounts<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    values.into_iter().map(parse_amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_european_formats() {
        assert!(approx(parse_amount("120,00 €"), 120.0));
        assert!(approx(parse_amount("€1.234,50"), 1234.5));
        assert!(approx(parse_amount("12,5"), 12.5));
        assert!(approx(parse_amount(",50 €"), 0.5));
    }

    #[test]
    fn test_anglo_formats() {
        assert!(approx(parse_amount("$1,234.56"), 1234.56));
        assert!(approx(parse_amount("150.00 €"), 150.0));
        assert!(approx(parse_amount("USD 80"), 80.0));
        assert!(approx(parse_amount("€.99"), 0.99));
        assert!(approx(parse_amount("$0.75"), 0.75));
    }

    #[test]
    fn test_repeated_separator_is_grouping() {
        assert!(approx(parse_amount("1.000.000 €"), 1_000_000.0));
        assert!(approx(parse_amount("2,500,000"), 2_500_000.0));
    }

    #[test]
    fn test_garbage_is_zero() {
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("unbezahlbar"), 0.0);
        assert_eq!(parse_amount("€"), 0.0);
        assert_eq!(parse_amount(".,"), 0.0);
    }

    #[test]
    fn test_negative_and_words() {
        assert!(approx(parse_amount("-15,00 €"), -15.0));
        assert!(approx(parse_amount("ca. 45 EUR"), 45.0));
        assert!(approx(parse_amount("Schätzwert: 45 EUR."), 45.0));
    }

    #[test]
    fn test_format_eur() {
        assert_eq!(format_eur(0.0), "€0,00");
        assert_eq!(format_eur(1234.5), "€1.234,50");
        assert_eq!(format_eur(1_000_000.0), "€1.000.000,00");
        assert_eq!(format_eur(999.999), "€1.000,00");
        assert_eq!(format_eur(-12.3), "-€12,30");
    }

    #[test]
    fn test_sum_amounts() {
        let total = sum_amounts(["120,00 €", "€1.000,50", "n/a"]);
        assert!(approx(total, 1120.5));
    }
}
