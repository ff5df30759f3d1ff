//! FILENAME: matrix-engine/src/format.rs
//! PURPOSE: Number formatting for resolved cells and totals.
//! CONTEXT: Measures carry a small format mini-language ("$#,##0.00",
//! "0.0", "#,##0"). Only three shapes are recognised: currency, fixed
//! decimals, and the default of grouped two-decimal output. Anything
//! unrecognised falls back to the default and never surfaces an error.
//! Currency always renders two decimals, whatever the pattern says.

const DEFAULT_DECIMALS: usize = 2;
const CURRENCY_DECIMALS: usize = 2;
const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

/// The recognised shape of a format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSpec {
    Currency { symbol: char },
    Fixed { decimals: usize },
    Default,
}

impl FormatSpec {
    pub fn parse(format: &str) -> FormatSpec {
        if let Some(symbol) = format.chars().find(|c| CURRENCY_SYMBOLS.contains(c)) {
            return FormatSpec::Currency { symbol };
        }

        match decimal_places(format) {
            Some(decimals) => FormatSpec::Fixed { decimals },
            None => FormatSpec::Default,
        }
    }
}

/// Counts the `0` placeholders after the decimal point. A pure integer
/// pattern (`0`, `#,##0`) counts as zero decimals.
fn decimal_places(format: &str) -> Option<usize> {
    if let Some(dot_pos) = format.find('.') {
        let zeros = format[dot_pos + 1..].chars().take_while(|c| *c == '0').count();
        return (zeros > 0).then_some(zeros);
    }

    let integer_pattern = format.contains('0')
        && format
            .chars()
            .filter(|c| !CURRENCY_SYMBOLS.contains(c) && !c.is_whitespace())
            .all(|c| matches!(c, '#' | '0' | ','));
    integer_pattern.then_some(0)
}

/// Formats an optional value. Missing values render as the empty string.
pub fn format_value(value: Option<f64>, format: Option<&str>) -> String {
    match value {
        Some(v) => format_number(v, format),
        None => String::new(),
    }
}

/// Formats a number with a measure's format string (or the default).
pub fn format_number(value: f64, format: Option<&str>) -> String {
    if !value.is_finite() {
        return format_non_finite(value);
    }

    match format.map(FormatSpec::parse).unwrap_or(FormatSpec::Default) {
        FormatSpec::Currency { symbol } => format_currency(value, CURRENCY_DECIMALS, symbol),
        FormatSpec::Fixed { decimals } => format_decimal(value, decimals),
        FormatSpec::Default => format_decimal(value, DEFAULT_DECIMALS),
    }
}

fn format_non_finite(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value > 0.0 {
        "∞".to_string()
    } else {
        "-∞".to_string()
    }
}

/// Grouped output with a fixed number of decimals. Values that round to
/// zero print without a sign.
fn format_decimal(value: f64, decimal_places: usize) -> String {
    let formatted = format_magnitude(value, decimal_places);
    if shows_minus(value, &formatted) {
        format!("-{}", formatted)
    } else {
        formatted
    }
}

/// Currency output: symbol before the digits, minus sign before the symbol.
fn format_currency(value: f64, decimal_places: usize, symbol: char) -> String {
    let formatted = format_magnitude(value, decimal_places);
    if shows_minus(value, &formatted) {
        format!("-{}{}", symbol, formatted)
    } else {
        format!("{}{}", symbol, formatted)
    }
}

fn format_magnitude(value: f64, decimal_places: usize) -> String {
    add_thousands_separator(&format!("{:.prec$}", value.abs(), prec = decimal_places))
}

/// A negative value keeps its sign only if a nonzero digit survives rounding.
fn shows_minus(value: f64, formatted: &str) -> bool {
    value < 0.0 && formatted.chars().any(|c| matches!(c, '1'..='9'))
}

/// Add thousands separators to a numeric string.
fn add_thousands_separator(s: &str) -> String {
    let (integer_part, decimal_part) = match s.split_once('.') {
        Some((int, dec)) => (int, Some(dec)),
        None => (s, None),
    };

    let negative = integer_part.starts_with('-');
    let digits: Vec<char> = integer_part.chars().filter(|c| c.is_ascii_digit()).collect();

    let mut result = String::with_capacity(s.len() + digits.len() / 3 + 1);
    if negative {
        result.push('-');
    }

    let len = digits.len();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    if let Some(decimal) = decimal_part {
        result.push('.');
        result.push_str(decimal);
    }

    result
}
