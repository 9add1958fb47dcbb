//! Universe list loading.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Parse a newline-delimited ticker list.
///
/// Lines are trimmed; blank lines and `#` comments are skipped. Repeated
/// tickers keep their first position.
pub fn parse_universe(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for line in text.lines() {
        let symbol = line.trim();
        if symbol.is_empty() || symbol.starts_with('#') {
            continue;
        }
        if seen.insert(symbol.to_string()) {
            symbols.push(symbol.to_string());
        } else {
            debug!(symbol, "Duplicate universe entry skipped");
        }
    }
    symbols
}

/// Load the universe file. A missing or unreadable file aborts the run.
pub fn load_universe(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read universe list {}", path.display()))?;
    Ok(parse_universe(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_universe_skips_comments_and_blanks() {
        let text = "# Nifty 500\nRELIANCE\n\n  TCS  \n#HDFCBANK\nINFY\nTCS\n";
        assert_eq!(parse_universe(text), vec!["RELIANCE", "TCS", "INFY"]);
    }

    #[test]
    fn test_load_universe_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_universe(&dir.path().join("nope.txt")).unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }
}
