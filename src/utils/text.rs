/// Convert a storage key such as `@stocks_watchlist` into a safe filesystem slug.
pub fn sanitize_key(name: &str) -> Option<String> {
    let mut slug = String::new();

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if matches!(ch, ' ' | '-' | '_' | '.') {
            slug.push(if ch == ' ' { '_' } else { ch });
        }
    }

    let slug = slug.trim_matches('.').to_string();
    if slug.is_empty() {
        None
    } else {
        Some(slug.to_lowercase())
    }
}

pub fn format_market_cap(value: f64) -> String {
    if value >= 1e12 {
        format!("${:.2}T", value / 1e12)
    } else if value >= 1e9 {
        format!("${:.2}B", value / 1e9)
    } else if value >= 1e6 {
        format!("${:.2}M", value / 1e6)
    } else {
        format!("${:.0}", value)
    }
}

pub fn format_volume(value: f64) -> String {
    if value >= 1e9 {
        format!("{:.1}B", value / 1e9)
    } else if value >= 1e6 {
        format!("{:.1}M", value / 1e6)
    } else if value >= 1e3 {
        format!("{:.1}K", value / 1e3)
    } else {
        format!("{:.0}", value)
    }
}

/// Prefix non-negative values with `+` so price moves read as deltas.
pub fn signed(value: f64, precision: usize) -> String {
    if value >= 0.0 {
        format!("+{:.*}", precision, value)
    } else {
        format!("{:.*}", precision, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_storage_keys() {
        assert_eq!(sanitize_key("@stocks_watchlist").as_deref(), Some("stocks_watchlist"));
        assert_eq!(sanitize_key("My List").as_deref(), Some("my_list"));
        assert_eq!(sanitize_key("../"), None);
        assert_eq!(sanitize_key("@@"), None);
    }

    #[test]
    fn formats_large_numbers() {
        assert_eq!(format_market_cap(2_710_000_000_000.0), "$2.71T");
        assert_eq!(format_market_cap(45_300_000.0), "$45.30M");
        assert_eq!(format_volume(48_200_000.0), "48.2M");
        assert_eq!(format_volume(950.0), "950");
        assert_eq!(signed(4.213, 2), "+4.21");
        assert_eq!(signed(-0.5, 2), "-0.50");
    }
}
