//! Human-readable byte counts for monitoring output.

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Format a byte count in IEC units, trimming trailing zeros from the fraction.
pub fn format_bytes(bytes: u64) -> String {
    let mut scaled = bytes as f64;
    let mut unit = 0;

    while scaled >= 1024.0 && unit + 1 < UNITS.len() {
        scaled /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{bytes} B");
    }

    let precision = if scaled >= 10.0 { 1 } else { 2 };
    let rendered = format!("{scaled:.precision$}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');

    format!("{rendered} {}", UNITS[unit])
}

/// Same as [`format_bytes`], for sizes that could not be measured.
pub fn format_size(size: Option<u64>) -> String {
    size.map(format_bytes).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_counts_stay_in_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
    }

    #[test]
    fn larger_counts_scale_and_trim() {
        assert_eq!(format_bytes(2048), "2 KiB");
        assert_eq!(format_bytes(3 * 1024 + 256), "3.25 KiB");
        assert_eq!(format_bytes(12 * 1024 * 1024 + 512 * 1024), "12.5 MiB");
        assert_eq!(format_bytes(1024_u64.pow(4) * 2048), "2048 TiB");
    }

    #[test]
    fn unknown_size_is_labelled() {
        assert_eq!(format_size(None), "unknown");
        assert_eq!(format_size(Some(10)), "10 B");
    }
}
