//! Human-readable formatting for byte counts, durations and progress gauges.

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count with a binary (1024) base, e.g. `1.50 MB`.
///
/// The value is divided until it drops below 1024, so unit boundaries never
/// render as `1024.00 B`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    // Rounding can push 1023.999 up to "1024.00"; promote instead.
    if unit < SIZE_UNITS.len() - 1 && (size * 100.0).round() / 100.0 >= 1024.0 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, SIZE_UNITS[unit])
}

/// Formats a transfer rate as `<size>/s`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    let clamped = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec
    } else {
        0.0
    };
    format!("{}/s", format_size(clamped as u64))
}

/// Formats a duration in seconds as `Ns`, `Mm Ss` or `Hh Mm`.
pub fn format_time(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// Builds a fixed-width textual gauge, e.g. `[████░░░░] 50.0%`.
///
/// Percentages outside 0..=100 are clamped.
pub fn progress_gauge(percent: f64, width: usize) -> String {
    let percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
    let filled = ((percent / 100.0) * width as f64) as usize;
    let filled = filled.min(width);
    let mut bar = String::with_capacity(width * 3 + 10);
    bar.push('[');
    bar.push_str(&"█".repeat(filled));
    bar.push_str(&"░".repeat(width - filled));
    bar.push(']');
    format!("{} {:.1}%", bar, percent)
}

/// Integer percentage of `done` over `total`; 0 when the total is unknown.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (done as u128 * 100) / total as u128;
    pct.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_size(text: &str) -> f64 {
        let (value, unit) = text.split_once(' ').unwrap();
        let value: f64 = value.parse().unwrap();
        let power = SIZE_UNITS.iter().position(|u| *u == unit).unwrap();
        value * 1024f64.powi(power as i32)
    }

    // ==================== format_size Tests ====================

    #[test]
    fn test_format_size_small_values() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
    }

    #[test]
    fn test_format_size_unit_boundaries() {
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_size(1024u64.pow(4)), "1.00 TB");
    }

    #[test]
    fn test_format_size_never_prints_1024_of_a_unit() {
        for bytes in [1023u64, 1024, 1024 * 1024 - 1, 1024 * 1024, 1024 * 1024 * 1024 - 1] {
            let text = format_size(bytes);
            assert!(!text.starts_with("1024.00"), "{} -> {}", bytes, text);
        }
    }

    #[test]
    fn test_format_size_roundtrip_within_tolerance() {
        for bytes in [1u64, 999, 4096, 123_456, 9_876_543, 5_000_000_000, 3 * 1024u64.pow(4)] {
            let back = parse_size(&format_size(bytes));
            let tolerance = (bytes as f64 * 0.005).max(0.01);
            assert!((back - bytes as f64).abs() <= tolerance, "{} -> {}", bytes, back);
        }
    }

    #[test]
    fn test_format_size_monotonic() {
        let mut previous = 0.0;
        for bytes in (0u64..5_000_000).step_by(7919) {
            let value = parse_size(&format_size(bytes));
            assert!(value + 0.01 * value.max(1.0) >= previous, "not monotonic at {}", bytes);
            previous = value;
        }
    }

    // ==================== format_time Tests ====================

    #[test]
    fn test_format_time_ranges() {
        assert_eq!(format_time(0), "0s");
        assert_eq!(format_time(59), "59s");
        assert_eq!(format_time(60), "1m 0s");
        assert_eq!(format_time(125), "2m 5s");
        assert_eq!(format_time(3599), "59m 59s");
        assert_eq!(format_time(3600), "1h 0m");
        assert_eq!(format_time(7322), "2h 2m");
    }

    #[test]
    fn test_format_time_injective_below_an_hour() {
        let mut seen = std::collections::HashSet::new();
        for secs in 0..3600 {
            assert!(seen.insert(format_time(secs)), "duplicate for {}", secs);
        }
    }

    #[test]
    fn test_format_time_injective_per_minute_above_an_hour() {
        let mut seen = std::collections::HashSet::new();
        for minute in 60..600 {
            assert!(seen.insert(format_time(minute * 60)));
        }
    }

    // ==================== Gauge Tests ====================

    #[test]
    fn test_progress_gauge_rendering() {
        assert_eq!(progress_gauge(0.0, 10), "[░░░░░░░░░░] 0.0%");
        assert_eq!(progress_gauge(50.0, 10), "[█████░░░░░] 50.0%");
        assert_eq!(progress_gauge(100.0, 10), "[██████████] 100.0%");
    }

    #[test]
    fn test_progress_gauge_clamps() {
        assert_eq!(progress_gauge(150.0, 4), "[████] 100.0%");
        assert_eq!(progress_gauge(-3.0, 4), "[░░░░] 0.0%");
        assert_eq!(progress_gauge(f64::NAN, 4), "[░░░░] 0.0%");
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 0), 0);
        assert_eq!(percent_of(50, 200), 25);
        assert_eq!(percent_of(300, 200), 100);
        assert_eq!(percent_of(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(2048.0), "2.00 KB/s");
        assert_eq!(format_rate(-1.0), "0.00 B/s");
        assert_eq!(format_rate(f64::INFINITY), "0.00 B/s");
    }
}
