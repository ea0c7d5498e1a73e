//! Weighted rule sets.
//!
//! A rule set is plain data ([`RuleSetConfig`]) that can be written in the
//! config file, compiled once into a [`RuleSet`] of case-insensitive regexes.
//! The built-in defaults target operative reports.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Flat bonus when the category matches the positive category set.
pub const CATEGORY_POSITIVE_WEIGHT: i32 = 18;

/// Flat penalty when the category matches the negative category set.
pub const CATEGORY_NEGATIVE_WEIGHT: i32 = -12;

/// A named pattern with no weight (category sets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPattern {
    pub name: String,
    pub pattern: String,
}

/// A named pattern contributing `weight` when it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedPattern {
    pub name: String,
    pub pattern: String,
    pub weight: i32,
}

fn named(name: &str, pattern: &str) -> NamedPattern {
    NamedPattern {
        name: name.to_string(),
        pattern: pattern.to_string(),
    }
}

fn weighted(name: &str, pattern: &str, weight: i32) -> WeightedPattern {
    WeightedPattern {
        name: name.to_string(),
        pattern: pattern.to_string(),
        weight,
    }
}

/// Serializable rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetConfig {
    #[serde(default)]
    pub category_positive: Vec<NamedPattern>,
    #[serde(default)]
    pub category_negative: Vec<NamedPattern>,
    #[serde(default)]
    pub title_boosts: Vec<WeightedPattern>,
    #[serde(default)]
    pub positive: Vec<WeightedPattern>,
    #[serde(default)]
    pub negative: Vec<WeightedPattern>,
}

impl Default for RuleSetConfig {
    fn default() -> Self {
        Self::operative_reports()
    }
}

impl RuleSetConfig {
    /// Rules tuned for surgical operative reports.
    pub fn operative_reports() -> Self {
        Self {
            category_positive: vec![
                named("operative", r"\boperative\b"),
                named("op report", r"\bop\s*report\b"),
                named("operative report", r"\boperative\s*report\b"),
                named("operative note", r"\boperative\s*note\b"),
                named("op note", r"\bop\s*note\b"),
                named("surgery", r"\bsurgery\b"),
                named("procedure", r"\bprocedure\b"),
            ],
            category_negative: vec![
                named("pre-op", r"\bpre[-\s]?op\b"),
                named("post-op", r"\bpost[-\s]?op\b"),
                named("progress", r"\bprogress\b"),
                named("clinic", r"\bclinic\b"),
                named("referral", r"\breferral\b"),
                named("insurance", r"\binsurance\b"),
                named("clearance", r"\bclearance\b"),
                named("outbound fax", r"\boutbound fax(?:es)?\b"),
                named("pathology", r"\bpathology\b"),
                named("lab", r"\blab(?:oratory)?\b"),
                named("imaging", r"\b(?:radiology|mri|ct|x[-\s]?ray)\b"),
            ],
            title_boosts: vec![
                weighted("operative report", r"\boperative\s+report\b", 40),
                weighted("operative note", r"\boperative\s+note\b", 34),
                weighted("op report", r"\bop(?:erative)?\s*report\b", 28),
                weighted("op note", r"\bop(?:erative)?\s*note\b", 26),
                weighted("surgery", r"\bsurgery\b", 14),
                weighted("procedure", r"\bprocedure\b", 16),
                weighted("OR report", r"\bOR\s+(?:report|note)\b", 24),
            ],
            positive: vec![
                weighted("indications", r"\bindications?\b", 10),
                weighted("findings", r"\bfindings?\b", 10),
                weighted("procedure", r"\bprocedure\b", 12),
                weighted("technique", r"\btechnique\b", 10),
                weighted("estimated blood loss", r"\bestimated blood loss\b", 12),
                weighted("anesthesia", r"\banesthesia\b", 10),
                weighted("assistant", r"\bassistant\b", 8),
                weighted("complications", r"\bcomplications?\b", 10),
                weighted("implants", r"\bimplants?\b", 8),
                weighted("disposition", r"\bdisposition\b", 8),
                weighted("tourniquet", r"\btourniquet\b", 8),
                weighted("arthroscopy", r"\barthroscop(?:y|ic)\b", 8),
                weighted("meniscectomy", r"\bmeniscectomy\b", 8),
                weighted("rotator cuff", r"\brotator cuff\b", 8),
                weighted("ACL", r"\bACLR?\b", 8),
            ],
            negative: vec![
                weighted(
                    "pre-op visit",
                    r"\bpre[-\s]?op(?:erative)?\s+(?:clearance|clinic|visit|assessment)\b",
                    -24,
                ),
                weighted(
                    "post-op visit",
                    r"\bpost[-\s]?op(?:erative)?\s+(?:visit|check|clinic)\b",
                    -18,
                ),
                weighted("progress note", r"\bprogress note\b", -14),
                weighted("discharge summary", r"\bdischarge summary\b", -12),
                weighted("pathology report", r"\bpathology report\b", -12),
                weighted(
                    "imaging",
                    r"\b(?:radiology|mri|ct|x[-\s]?ray)\b",
                    -12,
                ),
                weighted("H&P", r"\bH&P\b", -10),
                weighted("history and physical", r"\bhistory and physical\b", -10),
                weighted("consult", r"\bconsult(?:ation)?\b", -10),
            ],
        }
    }

    /// Compile every pattern. Fails on the first invalid regex.
    pub fn compile(&self) -> Result<RuleSet, regex::Error> {
        let category = |set: &[NamedPattern]| -> Result<Vec<Rule>, regex::Error> {
            set.iter()
                .map(|p| Rule::new(&p.name, &p.pattern, 0))
                .collect()
        };
        let weighted = |set: &[WeightedPattern]| -> Result<Vec<Rule>, regex::Error> {
            set.iter()
                .map(|p| Rule::new(&p.name, &p.pattern, p.weight))
                .collect()
        };

        Ok(RuleSet {
            category_positive: category(&self.category_positive)?,
            category_negative: category(&self.category_negative)?,
            title_boosts: weighted(&self.title_boosts)?,
            positive: weighted(&self.positive)?,
            negative: weighted(&self.negative)?,
        })
    }
}

/// One compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub weight: i32,
    regex: Regex,
}

impl Rule {
    fn new(name: &str, pattern: &str, weight: i32) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            name: name.to_string(),
            weight,
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Compiled rule set.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub category_positive: Vec<Rule>,
    pub category_negative: Vec<Rule>,
    pub title_boosts: Vec<Rule>,
    pub positive: Vec<Rule>,
    pub negative: Vec<Rule>,
}

/// Sum of matched weights plus the names that matched, in rule order.
pub(crate) fn score_rules(rules: &[Rule], text: &str) -> (i32, Vec<String>) {
    let mut total = 0;
    let mut hits = Vec::new();
    for rule in rules {
        if rule.is_match(text) {
            total += rule.weight;
            hits.push(rule.name.clone());
        }
    }
    (total, hits)
}

/// Names of matched rules, in rule order.
pub(crate) fn matching_names(rules: &[Rule], text: &str) -> Vec<String> {
    rules
        .iter()
        .filter(|r| r.is_match(text))
        .map(|r| r.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_compile() {
        let rules = RuleSetConfig::default().compile().unwrap();
        assert_eq!(rules.title_boosts.len(), 7);
        assert_eq!(rules.category_negative.len(), 11);
    }

    #[test]
    fn test_rules_are_case_insensitive() {
        let rules = RuleSetConfig::default().compile().unwrap();
        let (score, hits) = score_rules(&rules.title_boosts, "OPERATIVE REPORT - left knee");
        assert_eq!(hits, vec!["operative report", "op report"]);
        assert_eq!(score, 68);
    }

    #[test]
    fn test_imaging_pattern_needs_word_boundaries() {
        let rules = RuleSetConfig::default().compile().unwrap();
        assert!(matching_names(&rules.category_negative, "CT Scan").contains(&"imaging".into()));
        // "ct" inside another word must not count as imaging
        assert!(!matching_names(&rules.category_negative, "Contract").contains(&"imaging".into()));
    }

    #[test]
    fn test_invalid_pattern_fails_compile() {
        let mut config = RuleSetConfig::default();
        config.positive.push(weighted("broken", r"(unclosed", 5));
        assert!(config.compile().is_err());
    }

    #[test]
    fn test_rule_set_toml_roundtrip() {
        let config = RuleSetConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: RuleSetConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
