//! Library version queries.

use crate::filter;

/// Encodes the version as `major * 1_000_000 + minor * 1_000 + patch`.
pub fn version_number() -> i32 {
    let part = |text: &str| text.parse::<i32>().unwrap_or(0);
    part(env!("CARGO_PKG_VERSION_MAJOR")) * 1_000_000
        + part(env!("CARGO_PKG_VERSION_MINOR")) * 1_000
        + part(env!("CARGO_PKG_VERSION_PATCH"))
}

/// Returns `"arcstream <version>"`.
pub fn version_string() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Returns the version string followed by the compiled-in filters and the
/// crates implementing them.
pub fn version_details() -> String {
    let mut details = version_string();
    for code in filter::compiled() {
        let (name, backend) = match code {
            filter::GZIP => ("gzip", "flate2"),
            filter::BZIP2 => ("bzip2", "bzip2"),
            filter::ZSTD => ("zstd", "zstd"),
            _ => continue,
        };
        details.push_str(&format!(" {}/{}", name, backend));
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_number_matches_string() {
        let number = version_number();
        let expected = format!(
            "arcstream {}.{}.{}",
            number / 1_000_000,
            number / 1_000 % 1_000,
            number % 1_000
        );
        assert_eq!(version_string(), expected);
    }

    #[test]
    fn test_details_list_compiled_filters() {
        let details = version_details();
        assert!(details.starts_with(&version_string()));
        #[cfg(feature = "deflate")]
        assert!(details.contains("gzip/flate2"));
        #[cfg(not(feature = "zstd"))]
        assert!(!details.contains("zstd"));
    }
}
