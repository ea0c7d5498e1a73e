//! Shared helper functions for CLI commands.

use std::path::Path;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

/// Merge identifiers from the command line and an optional file, keeping
/// first-seen order and dropping duplicates.
pub fn collect_ids(mut ids: Vec<String>, file: Option<&Path>) -> anyhow::Result<Vec<String>> {
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read identifiers from {}", path.display()))?;
        ids.extend(parse_ids(&text));
    }

    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
    if ids.is_empty() {
        anyhow::bail!("No identifiers given. Pass them as arguments or with --ids-file.");
    }
    Ok(ids)
}

/// One identifier per line; blank lines, `#` comments, and a leading
/// `MRN` header are skipped. Only the first comma-separated field counts.
pub fn parse_ids(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim_start_matches('\u{feff}'))
        .filter_map(|l| l.split(',').next())
        .map(|f| f.trim().trim_matches('"').to_string())
        .filter(|f| !f.is_empty() && !f.starts_with('#') && !f.eq_ignore_ascii_case("mrn"))
        .collect()
}

pub fn progress_bar(len: u64) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids_skips_headers_and_comments() {
        let text = "\u{feff}MRN,Name\n12345,Doe\n\n# later\n 67890 \n\"111\",x\n";
        assert_eq!(parse_ids(text), vec!["12345", "67890", "111"]);
    }

    #[test]
    fn test_collect_ids_dedups_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ids.txt");
        std::fs::write(&file, "2\n3\n1\n").unwrap();

        let ids = collect_ids(vec!["1".into(), "2".into()], Some(&file)).unwrap();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_collect_ids_requires_something() {
        assert!(collect_ids(Vec::new(), None).is_err());
    }
}
