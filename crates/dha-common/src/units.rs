//! Byte-size helpers used in progress and batch log lines

/// Number of bytes in one kibibyte
pub const KIB: u64 = 1024;

/// Number of bytes in one mebibyte
pub const MIB: u64 = 1024 * KIB;

/// Convert a size given in kibibytes to bytes, saturating on overflow
pub fn kib_to_bytes(kib: u64) -> u64 {
    kib.saturating_mul(KIB)
}

/// Convert a size given in mebibytes to bytes, saturating on overflow
pub fn mib_to_bytes(mib: u64) -> u64 {
    mib.saturating_mul(MIB)
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(153_600), "150.00 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(1_099_511_627_776), "1.00 TB");
    }

    #[test]
    fn test_kib_to_bytes() {
        assert_eq!(kib_to_bytes(150), 153_600);
        assert_eq!(kib_to_bytes(u64::MAX), u64::MAX);
        assert_eq!(mib_to_bytes(2), 2_097_152);
        assert_eq!(mib_to_bytes(u64::MAX), u64::MAX);
    }
}
