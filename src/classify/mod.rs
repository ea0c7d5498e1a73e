//! Document classification.
//!
//! A record is scored on four components (category, title, positive content,
//! negative content) against a compiled [`RuleSet`]. Scoring is a pure
//! function of the record and the rules.

pub mod age;
mod rules;

pub use age::{AgeAssessment, AgeAssessor, ProcedureDateOverrides};
pub use rules::{
    NamedPattern, Rule, RuleSet, RuleSetConfig, WeightedPattern, CATEGORY_NEGATIVE_WEIGHT,
    CATEGORY_POSITIVE_WEIGHT,
};

use anyhow::Context;
use serde::Serialize;

use crate::config::ClassifierConfig;
use crate::listing::AttachmentRecord;

/// Default pass threshold.
pub const STANDARD_THRESHOLD: i32 = 26;

/// Looser threshold used in aggressive mode.
pub const AGGRESSIVE_THRESHOLD: i32 = 22;

/// Which rule group a match came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleGroup {
    CategoryPositive,
    CategoryNegative,
    Title,
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub group: RuleGroup,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComponentScores {
    pub category: i32,
    pub title: i32,
    pub positive: i32,
    pub negative: i32,
}

impl ComponentScores {
    pub fn total(&self) -> i32 {
        self.category + self.title + self.positive + self.negative
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub score: i32,
    pub passes: bool,
    pub threshold: i32,
    pub components: ComponentScores,
    pub category_positive: bool,
    pub category_negative: bool,
    /// Every matched rule, ordered category, title, positive, negative.
    pub matched_rules: Vec<MatchedRule>,
}

impl ClassificationResult {
    /// Names of matched rules in one group.
    pub fn hits(&self, group: RuleGroup) -> Vec<&str> {
        self.matched_rules
            .iter()
            .filter(|m| m.group == group)
            .map(|m| m.name.as_str())
            .collect()
    }
}

/// Scores records against a rule set.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: RuleSet,
    threshold: i32,
}

impl Classifier {
    pub fn new(rules: RuleSet, threshold: i32) -> Self {
        Self { rules, threshold }
    }

    /// Built-in operative-report rules at the standard threshold.
    pub fn operative_reports() -> anyhow::Result<Self> {
        Self::from_config(&ClassifierConfig::default())
    }

    pub fn from_config(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let rules = config
            .rules
            .clone()
            .unwrap_or_default()
            .compile()
            .context("Invalid classifier rule pattern")?;
        Ok(Self::new(rules, threshold_for(config)))
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn evaluate(&self, record: &AttachmentRecord) -> ClassificationResult {
        let mut matched_rules = Vec::new();
        let mut record_hits = |group: RuleGroup, names: Vec<String>| {
            matched_rules.extend(names.into_iter().map(|name| MatchedRule { group, name }));
        };

        let cat_pos_hits = rules::matching_names(&self.rules.category_positive, &record.category);
        let cat_neg_hits = rules::matching_names(&self.rules.category_negative, &record.category);
        let category_positive = !cat_pos_hits.is_empty();
        let category_negative = !cat_neg_hits.is_empty();
        record_hits(RuleGroup::CategoryPositive, cat_pos_hits);
        record_hits(RuleGroup::CategoryNegative, cat_neg_hits);

        let mut category = 0;
        if category_positive {
            category += CATEGORY_POSITIVE_WEIGHT;
        }
        if category_negative {
            category += CATEGORY_NEGATIVE_WEIGHT;
        }

        let (title, title_hits) = rules::score_rules(&self.rules.title_boosts, &record.title);
        record_hits(RuleGroup::Title, title_hits);

        let content = format!("{}\n{}", record.title, record.body_preview);
        let (positive, pos_hits) = rules::score_rules(&self.rules.positive, &content);
        record_hits(RuleGroup::Positive, pos_hits);
        let (negative, neg_hits) = rules::score_rules(&self.rules.negative, &content);
        record_hits(RuleGroup::Negative, neg_hits);

        let components = ComponentScores {
            category,
            title,
            positive,
            negative,
        };
        let score = components.total();
        let passes =
            score >= self.threshold || (category_positive && (title > 0 || positive > 0));

        ClassificationResult {
            score,
            passes,
            threshold: self.threshold,
            components,
            category_positive,
            category_negative,
            matched_rules,
        }
    }
}

/// Explicit threshold, else the preset for the aggressive flag.
pub fn threshold_for(config: &ClassifierConfig) -> i32 {
    config.threshold.unwrap_or(if config.aggressive {
        AGGRESSIVE_THRESHOLD
    } else {
        STANDARD_THRESHOLD
    })
}
