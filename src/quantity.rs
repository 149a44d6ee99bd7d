use thiserror::Error;

/// Ki per displayed GB, following the monitoring backend's convention.
pub const KIBI_PER_GB: f64 = 976_562.0;

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ei", 1_152_921_504_606_846_976.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ti", 1_099_511_627_776.0),
    ("Gi", 1_073_741_824.0),
    ("Mi", 1_048_576.0),
    ("Ki", 1_024.0),
];
const DECIMAL_SUFFIXES: [(&str, f64); 7] = [
    ("E", 1_000_000_000_000_000_000.0),
    ("P", 1_000_000_000_000_000.0),
    ("T", 1_000_000_000_000.0),
    ("G", 1_000_000_000.0),
    ("M", 1_000_000.0),
    ("K", 1_000.0),
    ("k", 1_000.0),
];

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum MetricParseError {
    #[error("metric `{field}` is not reported")]
    Missing { field: &'static str },
    #[error("`{input}` is not a numeric magnitude")]
    Malformed { input: String },
    #[error("total is zero")]
    ZeroTotal,
}

/// Share of `current` in `total` as a percentage rounded to two decimals.
///
/// Unit suffixes are stripped from both sides before dividing, so both values
/// must be expressed in the same unit.
pub fn percent_of(total: &str, current: &str) -> Result<f64, MetricParseError> {
    let total_value = stripped_magnitude(total)?;
    let current_value = stripped_magnitude(current)?;
    if total_value == 0.0 {
        return Err(MetricParseError::ZeroTotal);
    }

    Ok(round2(current_value / total_value * 100.0))
}

/// Renders a Ki magnitude such as `"16318784Ki"` as `"16.71GB"`.
pub fn to_gb(raw: &str) -> Result<String, MetricParseError> {
    let kibibytes = leading_magnitude(raw)?;
    Ok(format!("{:.2}GB", kibibytes / KIBI_PER_GB))
}

pub fn format_percent(value: f64) -> String {
    format!("{value}%")
}

pub fn parse_cpu_millicores(raw: &str) -> Result<u64, MetricParseError> {
    let value = raw.trim();
    let (number, divisor) = if let Some(number) = value.strip_suffix('m') {
        (number, 1.0)
    } else if let Some(number) = value.strip_suffix('u') {
        (number, 1_000.0)
    } else if let Some(number) = value.strip_suffix('n') {
        (number, 1_000_000.0)
    } else {
        (value, 0.001)
    };

    non_negative(number, raw).map(|numeric| (numeric / divisor).round() as u64)
}

pub fn parse_memory_bytes(raw: &str) -> Result<u64, MetricParseError> {
    let value = raw.trim();
    let (number, multiplier) = BINARY_SUFFIXES
        .iter()
        .chain(DECIMAL_SUFFIXES.iter())
        .find_map(|(suffix, multiplier)| {
            value
                .strip_suffix(suffix)
                .map(|number| (number, *multiplier))
        })
        .or_else(|| value.strip_suffix('m').map(|number| (number, 0.001)))
        .unwrap_or((value, 1.0));

    non_negative(number, raw).map(|numeric| (numeric * multiplier).round() as u64)
}

pub fn millicores_quantity(millicores: u64) -> String {
    format!("{millicores}m")
}

pub fn kibibytes_quantity(bytes: u64) -> String {
    format!("{}Ki", bytes / 1_024)
}

fn stripped_magnitude(raw: &str) -> Result<f64, MetricParseError> {
    let digits = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect::<String>();
    finite(&digits, raw)
}

fn leading_magnitude(raw: &str) -> Result<f64, MetricParseError> {
    let trimmed = raw.trim();
    let end = trimmed
        .char_indices()
        .find(|(index, c)| !(c.is_ascii_digit() || *c == '.' || (*index == 0 && *c == '-')))
        .map(|(index, _)| index)
        .unwrap_or(trimmed.len());
    finite(&trimmed[..end], raw)
}

fn non_negative(number: &str, raw: &str) -> Result<f64, MetricParseError> {
    finite(number.trim(), raw).and_then(|value| {
        if value < 0.0 {
            Err(malformed(raw))
        } else {
            Ok(value)
        }
    })
}

fn finite(number: &str, raw: &str) -> Result<f64, MetricParseError> {
    number
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| malformed(raw))
}

fn malformed(raw: &str) -> MetricParseError {
    MetricParseError::Malformed {
        input: raw.to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
