//! Human readable number, size and duration formatting for reports.

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Compact count: `950`, `12.5K`, `3.2M`.
pub fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

/// Byte size with a binary unit: `512B`, `4KB`, `129MB`, `1.5GB`.
pub fn format_bytes(n: u64) -> String {
    if n >= GIB {
        format!("{:.1}GB", n as f64 / GIB as f64)
    } else if n >= MIB {
        format!("{:.0}MB", n as f64 / MIB as f64)
    } else if n >= KIB {
        format!("{:.0}KB", n as f64 / KIB as f64)
    } else {
        format!("{}B", n)
    }
}

/// Uptime given in milliseconds: `2d 5h`, `3h 12m` or `7m`.
pub fn format_uptime(millis: u64) -> String {
    let seconds = millis / 1000;
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Percentage of `used` in `total`; zero when the total is unknown.
pub fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1.0K");
        assert_eq!(format_number(12_340), "12.3K");
        assert_eq!(format_number(2_500_000), "2.5M");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(4 * KIB), "4KB");
        assert_eq!(format_bytes(129 * MIB), "129MB");
        assert_eq!(format_bytes(3 * GIB / 2), "1.5GB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(59_000), "0m");
        assert_eq!(format_uptime(7 * 60_000), "7m");
        assert_eq!(format_uptime((3 * 3_600 + 12 * 60) * 1000), "3h 12m");
        assert_eq!(format_uptime((2 * 86_400 + 5 * 3_600 + 30) * 1000), "2d 5h");
    }

    #[test]
    fn test_percent_of_unknown_total() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }
}
