//! Shared utility functions.

/// Round to two decimals, the precision of every reported score.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `covered / total * 100`, rounded; 0 when nothing is tracked
pub fn percentage(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(covered as f64 / total as f64 * 100.0)
    }
}

/// Instance ids may contain `/`; artifacts are named with `_` instead.
pub fn safe_file_name(id: &str) -> String {
    id.replace('/', "_")
}

/// Host identifier written into lock markers
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

/// Local wall-clock time as `%Y-%m-%d %H:%M:%S`
pub fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// UTC time in ISO 8601 with a trailing `Z`
pub fn utc_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.5), 0.5);
        assert_eq!(round2(2.0 / 3.0), 0.67);
        assert_eq!(round2(0.333333), 0.33);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(7, 10), 70.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("owner/repo-12"), "owner_repo-12");
        assert_eq!(safe_file_name("plain"), "plain");
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(local_timestamp().len(), "2025-01-01 12:00:00".len());
        assert!(utc_timestamp().ends_with('Z'));
        assert!(!hostname().is_empty());
    }
}
