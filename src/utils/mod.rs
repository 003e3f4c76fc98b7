//! Shared utilities: logging setup and display formatting

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `level` feeds an `EnvFilter` (so directives like `ckb_stratum_proxy=debug`
/// work too); `format` picks plain or JSON output.
pub fn init_logging(level: &str, format: &str) {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
    }
}

/// Format a hashrate with a binary-free SI suffix, e.g. `12.34 GH/s`.
pub fn format_hashrate(hashes_per_sec: f64) -> String {
    const UNITS: [&str; 7] = ["H/s", "KH/s", "MH/s", "GH/s", "TH/s", "PH/s", "EH/s"];
    let mut value = hashes_per_sec.max(0.0);
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hashrate() {
        assert_eq!(format_hashrate(0.0), "0.00 H/s");
        assert_eq!(format_hashrate(999.0), "999.00 H/s");
        assert_eq!(format_hashrate(1_500.0), "1.50 KH/s");
        assert_eq!(format_hashrate(12_340_000_000.0), "12.34 GH/s");
        assert_eq!(format_hashrate(-5.0), "0.00 H/s");
    }

    #[test]
    fn test_format_hashrate_caps_at_largest_unit() {
        let huge = 1e24;
        assert!(format_hashrate(huge).ends_with("EH/s"));
    }
}
