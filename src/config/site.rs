//! Site profile: selectors and ordered fallback strategies.
//!
//! Every "try A, then B, then C" ladder the listing needs is expressed as an
//! ordered list of tagged strategies. Evaluation always walks the list in
//! order and stops at the first success. Defaults target the ModMed EMA
//! patient attachment listing.

use serde::{Deserialize, Serialize};

/// A tagged matcher: what kind of thing it looks for, and the CSS selector
/// that finds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy<K> {
    pub kind: K,
    pub matcher: String,
}

impl<K> Strategy<K> {
    pub fn new(kind: K, matcher: impl Into<String>) -> Self {
        Self {
            kind,
            matcher: matcher.into(),
        }
    }
}

/// Shapes of a direct document link inside a row, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkKind {
    AttachmentPath,
    FileAttachment,
    PdfSuffix,
    AnyHref,
}

/// Shapes of a clickable element that opens a row's document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// An element wired to an open/view handler.
    ExplicitAction,
    /// Any anchor or button in the first cell.
    FirstCellClickable,
    /// The row's own document anchor (used by the page-level click fallback).
    DocumentAnchor,
}

/// Ways of locating the "next page" control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NextControlKind {
    DataIdentifier,
    AriaLabel,
    PaginationClass,
}

/// Ways of locating the page-size `<select>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageSizeControlKind {
    ElementId,
    DataIdentifier,
}

/// How to pick an option in the page-size `<select>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PageSizeStrategy {
    /// Match an option's `value` attribute (each form tried in order).
    ByValue { values: Vec<String> },
    /// Match an option's visible text.
    ByLabel { label: String },
    /// Take the last option, whatever it is.
    LastOption,
}

impl PageSizeStrategy {
    pub fn describe(&self) -> String {
        match self {
            PageSizeStrategy::ByValue { values } => format!("value:{}", values.join("|")),
            PageSizeStrategy::ByLabel { label } => format!("label:{}", label),
            PageSizeStrategy::LastOption => "last-option".to_string(),
        }
    }
}

/// Login form (optional; a remote browser may already be logged in).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginProfile {
    pub url: String,
    /// Landing button clicked before the credential form appears.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landing: Option<String>,
    pub username: String,
    pub password: String,
    pub submit: String,
}

impl Default for LoginProfile {
    fn default() -> Self {
        Self {
            url: "https://entaaf.ema.md/ema/Login.action".to_string(),
            landing: Some("input[value*='Practice Staff']".to_string()),
            username: "input[name='username']".to_string(),
            password: "input[name='password']".to_string(),
            submit: "button[type='submit']".to_string(),
        }
    }
}

/// Patient search by identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchProfile {
    pub url: String,
    /// Combo box that reveals the search input when clicked.
    pub combo: String,
    pub input: String,
    /// First result row, clicked to open the subject.
    pub result_row: String,
    /// Element whose presence means the subject chart has loaded.
    pub ready: String,
}

impl Default for SearchProfile {
    fn default() -> Self {
        Self {
            url: "https://entaaf.ema.md/ema/web/practice/staff#/practice/staff/patient/list"
                .to_string(),
            combo: "div.ng-select-container div.ng-input".to_string(),
            input: "div.ng-select-container div.ng-input input".to_string(),
            result_row: "table tbody tr".to_string(),
            ready: "a.po-visit-date".to_string(),
        }
    }
}

/// Zero-indexed table columns. `None` means the listing has no such column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    #[serde(default)]
    pub title: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<usize>,
    /// Preview column; when unset the full row text is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_date: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_date: Option<usize>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            title: 0,
            category: Some(1),
            preview: None,
            encounter_date: None,
            document_date: Some(2),
        }
    }
}

/// Page-size negotiation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSizeProfile {
    /// Desired page size, as shown to the user.
    pub target: String,
    pub controls: Vec<Strategy<PageSizeControlKind>>,
    pub strategies: Vec<PageSizeStrategy>,
}

impl Default for PageSizeProfile {
    fn default() -> Self {
        Self {
            target: "100".to_string(),
            controls: vec![
                Strategy::new(PageSizeControlKind::ElementId, "select#pageSizeSelect"),
                Strategy::new(
                    PageSizeControlKind::DataIdentifier,
                    "select[data-identifier^='pagination-view-records-by']",
                ),
            ],
            strategies: vec![
                PageSizeStrategy::ByValue {
                    values: vec!["number:100".to_string(), "100".to_string()],
                },
                PageSizeStrategy::ByLabel {
                    label: "100".to_string(),
                },
                PageSizeStrategy::LastOption,
            ],
        }
    }
}

/// Permissive last-resort sweep used when a harvest saved nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepProfile {
    pub anchors: String,
    /// Lowercase substrings; an href containing any of them is a candidate.
    pub keywords: Vec<String>,
}

impl Default for SweepProfile {
    fn default() -> Self {
        Self {
            anchors: "a[href*='/fileattachment/']".to_string(),
            keywords: [
                "operative",
                "op_report",
                "op-report",
                "or_report",
                "surgical_report",
                "procedure",
                "opnote",
                "op note",
                "op%20note",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Everything the pipeline needs to know about one record system's markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Login form. Skipped when no credentials are configured.
    #[serde(default = "default_login", skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginProfile>,
    #[serde(default)]
    pub search: SearchProfile,
    /// Blocking overlays removed before interacting with the listing.
    #[serde(default = "default_overlays")]
    pub overlays: Vec<String>,
    /// Tab that activates the attachment listing.
    #[serde(default = "default_listing_tab")]
    pub listing_tab: String,
    #[serde(default = "default_rows")]
    pub rows: String,
    #[serde(default = "default_cells")]
    pub cells: String,
    #[serde(default)]
    pub columns: ColumnMap,
    #[serde(default = "default_link_strategies")]
    pub link_strategies: Vec<Strategy<LinkKind>>,
    #[serde(default = "default_action_strategies")]
    pub action_strategies: Vec<Strategy<ActionKind>>,
    #[serde(default = "default_next_controls")]
    pub next_controls: Vec<Strategy<NextControlKind>>,
    #[serde(default)]
    pub page_size: PageSizeProfile,
    #[serde(default)]
    pub sweep: SweepProfile,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            login: Some(LoginProfile::default()),
            search: SearchProfile::default(),
            overlays: default_overlays(),
            listing_tab: default_listing_tab(),
            rows: default_rows(),
            cells: default_cells(),
            columns: ColumnMap::default(),
            link_strategies: default_link_strategies(),
            action_strategies: default_action_strategies(),
            next_controls: default_next_controls(),
            page_size: PageSizeProfile::default(),
            sweep: SweepProfile::default(),
        }
    }
}

fn default_login() -> Option<LoginProfile> {
    Some(LoginProfile::default())
}

fn default_overlays() -> Vec<String> {
    vec![
        "bs-modal-backdrop".to_string(),
        ".modal-backdrop".to_string(),
        "modal-container[role=\"dialog\"]".to_string(),
    ]
}

fn default_listing_tab() -> String {
    "div.nav-tab.ngx-nav-tab[data-identifier=\"attachments-tab\"]".to_string()
}

fn default_rows() -> String {
    "table tbody tr".to_string()
}

fn default_cells() -> String {
    "td".to_string()
}

fn default_link_strategies() -> Vec<Strategy<LinkKind>> {
    vec![
        Strategy::new(LinkKind::AttachmentPath, "a[href*='/ema/secure/fileattachment/']"),
        Strategy::new(LinkKind::FileAttachment, "a[href*='fileattachment']"),
        Strategy::new(LinkKind::PdfSuffix, "a[href$='.pdf']"),
        Strategy::new(LinkKind::AnyHref, "a[href]"),
    ]
}

fn default_action_strategies() -> Vec<Strategy<ActionKind>> {
    vec![
        Strategy::new(
            ActionKind::ExplicitAction,
            "a[ng-click*='open'], a[ng-click*='view'], a[class*='link']",
        ),
        Strategy::new(
            ActionKind::FirstCellClickable,
            "td:first-child a, td:first-child button",
        ),
    ]
}

fn default_next_controls() -> Vec<Strategy<NextControlKind>> {
    vec![
        Strategy::new(NextControlKind::DataIdentifier, "a[data-identifier='pagination-next']"),
        Strategy::new(NextControlKind::AriaLabel, "a[aria-label='Next']"),
        Strategy::new(NextControlKind::PaginationClass, "li.pagination-next a"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_strategies_most_specific_first() {
        let profile = SiteProfile::default();
        let kinds: Vec<LinkKind> = profile.link_strategies.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LinkKind::AttachmentPath,
                LinkKind::FileAttachment,
                LinkKind::PdfSuffix,
                LinkKind::AnyHref
            ]
        );
    }

    #[test]
    fn test_page_size_strategies_end_with_last_option() {
        let profile = PageSizeProfile::default();
        assert_eq!(profile.strategies.last(), Some(&PageSizeStrategy::LastOption));
        assert_eq!(profile.strategies[0].describe(), "value:number:100|100");
    }

    #[test]
    fn test_site_profile_toml_roundtrip_keeps_strategy_tags() {
        let profile = SiteProfile::default();
        let text = toml::to_string(&profile).unwrap();
        assert!(text.contains("kind = \"by-value\""));
        assert!(text.contains("kind = \"attachment-path\""));
        let parsed: SiteProfile = toml::from_str(&text).unwrap();
        assert_eq!(parsed, profile);
    }

    #[test]
    fn test_partial_site_profile_uses_defaults() {
        let parsed: SiteProfile = toml::from_str("rows = \"table.grid tr\"").unwrap();
        assert_eq!(parsed.rows, "table.grid tr");
        assert!(parsed.login.is_some());
        assert_eq!(parsed.link_strategies.len(), 4);
    }
}
