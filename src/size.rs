use thiserror::Error;

use crate::config::Defaults;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("missing number in size '{0}'")]
    MissingNumber(String),

    #[error("unknown unit '{unit}' in size '{input}'")]
    UnknownUnit { input: String, unit: String },

    #[error("size '{0}' is too large")]
    TooLarge(String),
}

/// Multiplier for a lower-cased unit suffix. Bare letters are decimal, `i`
/// suffixed units are binary.
fn unit_multiplier(unit: &str) -> Option<f64> {
    let m = match unit {
        "" | "b" => 1.0,
        "k" | "kb" => 1e3,
        "ki" | "kib" => 1024.0,
        "m" | "mb" => 1e6,
        "mi" | "mib" => 1024f64.powi(2),
        "g" | "gb" => 1e9,
        "gi" | "gib" => 1024f64.powi(3),
        "t" | "tb" => 1e12,
        "ti" | "tib" => 1024f64.powi(4),
        "p" | "pb" => 1e15,
        "pi" | "pib" => 1024f64.powi(5),
        "e" | "eb" => 1e18,
        "ei" | "eib" => 1024f64.powi(6),
        _ => return None,
    };
    Some(m)
}

/// Parse a human readable quantity such as `10M`, `1.5 GiB` or `42`.
pub fn parse_bytes(input: &str) -> Result<u64, SizeError> {
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let value: f64 = number
        .replace(',', "")
        .parse()
        .map_err(|_| SizeError::MissingNumber(input.to_string()))?;

    let unit = unit.trim().to_lowercase();
    let multiplier = unit_multiplier(&unit).ok_or_else(|| SizeError::UnknownUnit {
        input: input.to_string(),
        unit: unit.clone(),
    })?;

    let bytes = value * multiplier;
    if bytes >= u64::MAX as f64 {
        return Err(SizeError::TooLarge(input.to_string()));
    }
    Ok(bytes as u64)
}

/// Resolve a chunk size string to a part size in bytes.
///
/// A bare integer is read as megabytes. Anything that does not parse falls
/// back to the default chunk size, and the result never drops below the
/// minimum part size.
pub fn parse_chunk_size(size: &str, defaults: &Defaults) -> u64 {
    chunk_size_or_default(size, defaults).0
}

/// Same as [`parse_chunk_size`], also handing back the parse error when the
/// default was used so the caller can report it once logging is up.
pub fn chunk_size_or_default(size: &str, defaults: &Defaults) -> (u64, Option<SizeError>) {
    let minimum = defaults.minimum_chunk_size_mb * MB;

    let size = if size.parse::<i64>().is_ok() {
        format!("{size}MB")
    } else {
        size.to_string()
    };

    let (bytes, fallback) = match parse_bytes(&size) {
        Ok(bytes) => (bytes, None),
        Err(e) => (defaults.chunk_size_mb * MB, Some(e)),
    };

    (bytes.max(minimum), fallback)
}

pub fn format_size(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
