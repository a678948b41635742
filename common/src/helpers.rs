/// Human-readable size with binary units, at most two decimals: `1536` is
/// `"1.5 KB"`. Anything past gigabytes is still shown in GB.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::format_file_size;

    #[test]
    fn sizes() {
        let tests = [
            (0, "0 Bytes"),
            (1, "1 Bytes"),
            (1023, "1023 Bytes"),
            (1024, "1 KB"),
            (1536, "1.5 KB"),
            (1234567, "1.18 MB"),
            (100 * 1024 * 1024, "100 MB"),
            (500 * 1024 * 1024, "500 MB"),
            (3 * 1024 * 1024 * 1024, "3 GB"),
            (2048 * 1024 * 1024 * 1024, "2048 GB"),
        ];
        for (bytes, expected) in tests {
            assert_eq!(format_file_size(bytes), expected, "{bytes}");
        }
    }
}
