//! Best-effort document dating for age screening.
//!
//! The assessment is informational: it lands in the audit log but never
//! decides whether a document is retrieved.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use chrono::{Duration as ChronoDuration, NaiveDate};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

/// Cutoff used when neither a minimum date nor a maximum age is configured.
pub const DEFAULT_CUTOFF: (i32, u32, u32) = (2016, 1, 1);

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%Y/%m/%d"];

static EMBEDDED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4}[-/]\d{1,2}[-/]\d{1,2}|\d{1,2}[-/]\d{1,2}[-/]\d{4})\b")
        .expect("embedded date regex")
});

static BARE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("bare year regex"));

/// Parse a date written in any of the common listing formats.
///
/// Tries the whole string first, then a date embedded in longer text, then
/// a bare year (mapped to June 30 of that year).
pub fn parse_date_tolerant(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(date) = parse_exact(text) {
        return Some(date);
    }

    for m in EMBEDDED_DATE.find_iter(text) {
        if let Some(date) = parse_exact(m.as_str()) {
            return Some(date);
        }
    }

    BARE_YEAR
        .find(text)
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .and_then(|year| NaiveDate::from_ymd_opt(year, 6, 30))
}

fn parse_exact(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Resolve the age cutoff. A fixed minimum date wins over a rolling window.
pub fn resolve_cutoff(
    min_date: Option<NaiveDate>,
    max_age_years: Option<u32>,
    today: NaiveDate,
) -> NaiveDate {
    if let Some(date) = min_date {
        return date;
    }
    if let Some(years) = max_age_years {
        return today - ChronoDuration::days(365 * i64::from(years));
    }
    let (y, m, d) = DEFAULT_CUTOFF;
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(today)
}

/// Identifier to procedure-date overrides.
#[derive(Debug, Clone, Default)]
pub struct ProcedureDateOverrides {
    dates: HashMap<String, String>,
}

impl ProcedureDateOverrides {
    /// Load a CSV with `MRN` and `ProcedureDate` header columns.
    ///
    /// A missing file yields an empty table. Rows lacking either value are
    /// skipped.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No procedure date overrides at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let Some(header) = lines.next() else {
            return Self::default();
        };
        let header = split_csv_line(header.trim_start_matches('\u{feff}'));
        let column = |name: &str| header.iter().position(|h| h.trim() == name);
        let (Some(id_col), Some(date_col)) = (column("MRN"), column("ProcedureDate")) else {
            warn!("Procedure date table lacks MRN/ProcedureDate columns");
            return Self::default();
        };

        let mut dates = HashMap::new();
        for (n, line) in lines.enumerate() {
            let fields = split_csv_line(line);
            let id = fields.get(id_col).map(|s| s.trim()).unwrap_or("");
            let date = fields.get(date_col).map(|s| s.trim()).unwrap_or("");
            if id.is_empty() || date.is_empty() {
                warn!("Skipping procedure date row {}: {:?}", n + 2, line);
                continue;
            }
            dates.insert(id.to_string(), date.to_string());
        }
        Self { dates }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            dates: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.dates.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Split one CSV line, honouring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Result of dating one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgeAssessment {
    pub best_date: Option<NaiveDate>,
    pub older_than_cutoff: bool,
    pub cutoff: NaiveDate,
}

/// Dates records against a fixed cutoff.
#[derive(Debug, Clone)]
pub struct AgeAssessor {
    cutoff: NaiveDate,
    overrides: ProcedureDateOverrides,
}

impl AgeAssessor {
    pub fn new(cutoff: NaiveDate, overrides: ProcedureDateOverrides) -> Self {
        Self { cutoff, overrides }
    }

    pub fn cutoff(&self) -> NaiveDate {
        self.cutoff
    }

    /// Priority: override for `id`, encounter date, document date, title.
    pub fn assess(
        &self,
        id: Option<&str>,
        encounter_date: Option<&str>,
        document_date: Option<&str>,
        title: &str,
    ) -> AgeAssessment {
        let override_date = id
            .and_then(|id| self.overrides.get(id))
            .and_then(parse_date_tolerant);

        let best_date = override_date
            .or_else(|| encounter_date.and_then(parse_date_tolerant))
            .or_else(|| document_date.and_then(parse_date_tolerant))
            .or_else(|| parse_date_tolerant(title));

        AgeAssessment {
            best_date,
            older_than_cutoff: best_date.is_some_and(|d| d < self.cutoff),
            cutoff: self.cutoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date_tolerant("2022-03-14"), Some(date(2022, 3, 14)));
        assert_eq!(parse_date_tolerant("03/14/2022"), Some(date(2022, 3, 14)));
        assert_eq!(parse_date_tolerant("03-14-2022"), Some(date(2022, 3, 14)));
        assert_eq!(parse_date_tolerant("2022/03/14"), Some(date(2022, 3, 14)));
        assert_eq!(parse_date_tolerant("  "), None);
        assert_eq!(parse_date_tolerant("no date here"), None);
    }

    #[test]
    fn test_parse_embedded_date_before_bare_year() {
        assert_eq!(
            parse_date_tolerant("Operative Report 03/14/2022"),
            Some(date(2022, 3, 14))
        );
        assert_eq!(parse_date_tolerant("Summary 2019"), Some(date(2019, 6, 30)));
        // 2150 is not a plausible year
        assert_eq!(parse_date_tolerant("Room 2150"), None);
    }

    #[test]
    fn test_resolve_cutoff_precedence() {
        let today = date(2026, 1, 1);
        assert_eq!(
            resolve_cutoff(Some(date(2018, 5, 1)), Some(2), today),
            date(2018, 5, 1)
        );
        assert_eq!(resolve_cutoff(None, Some(1), today), date(2025, 1, 1));
        assert_eq!(resolve_cutoff(None, None, today), date(2016, 1, 1));
    }

    #[test]
    fn test_title_year_with_empty_overrides() {
        let assessor = AgeAssessor::new(date(2016, 1, 1), ProcedureDateOverrides::default());
        let age = assessor.assess(Some("12345"), None, None, "Summary 2019");
        assert_eq!(age.best_date, Some(date(2019, 6, 30)));
        assert!(!age.older_than_cutoff);
    }

    #[test]
    fn test_override_beats_encounter_date() {
        let overrides = ProcedureDateOverrides::from_pairs([("777", "2012-02-02")]);
        let assessor = AgeAssessor::new(date(2016, 1, 1), overrides);

        let age = assessor.assess(Some("777"), Some("2020-01-01"), Some("2021-01-01"), "");
        assert_eq!(age.best_date, Some(date(2012, 2, 2)));
        assert!(age.older_than_cutoff);

        let other = assessor.assess(Some("778"), Some("not a date"), Some("2021-01-01"), "");
        assert_eq!(other.best_date, Some(date(2021, 1, 1)));
    }

    #[test]
    fn test_overrides_parse_and_skip_bad_rows() {
        let table = ProcedureDateOverrides::parse(
            "\u{feff}MRN,ProcedureDate,Notes\n100,2020-05-05,\"knee, left\"\n,2020-01-01,\n200,,x\n",
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("100"), Some("2020-05-05"));
    }

    #[test]
    fn test_missing_override_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = ProcedureDateOverrides::load(&dir.path().join("absent.csv")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_split_csv_line_handles_escaped_quotes() {
        assert_eq!(
            split_csv_line(r#"a,"b ""c"", d",e"#),
            vec!["a", r#"b "c", d"#, "e"]
        );
    }
}
