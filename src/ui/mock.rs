//! Scripted in-memory attachment listing.
//!
//! Recognises exactly the selectors of the default [`SiteProfile`] and
//! simulates a paginated table, a page-size `<select>`, a "next" control,
//! viewer tabs opened by row clicks, and the patient search form.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{scripts, BrowserCookie, ContextId, ElementRef, OptionChoice, UiDriver};
use crate::config::site::{ActionKind, LinkKind, SiteProfile};
use crate::error::UiError;

pub const MOCK_ORIGIN: &str = "https://emr.example";

#[derive(Debug, Clone, Default)]
pub struct MockRow {
    /// Rendered cells: title, category, document date.
    pub cells: Vec<String>,
    pub link: Option<String>,
    pub has_action: bool,
    /// Location of the viewer tab the action opens, if any.
    pub action_opens: Option<String>,
}

impl MockRow {
    pub fn linked(title: &str, category: &str, href: &str) -> Self {
        Self {
            cells: vec![title.into(), category.into(), String::new()],
            link: Some(href.into()),
            ..Default::default()
        }
    }

    pub fn actionable(title: &str, category: &str, opens: Option<&str>) -> Self {
        Self {
            cells: vec![title.into(), category.into(), String::new()],
            has_action: true,
            action_opens: opens.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn bare(title: &str, category: &str) -> Self {
        Self {
            cells: vec![title.into(), category.into(), String::new()],
            ..Default::default()
        }
    }

    pub fn dated(mut self, date: &str) -> Self {
        self.cells[2] = date.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct MockListing {
    pub rows: Vec<MockRow>,
    pub page_size: usize,
    /// `(value, label)` pairs; `None` means the page-size control is absent.
    pub page_size_options: Option<Vec<(String, String)>>,
    pub tab_present: bool,
    /// Number of tab clicks that fail before one succeeds.
    pub tab_failures: u32,
    pub block_native_clicks: bool,
    pub block_scroll: bool,
    /// "next" stays enabled on the last page; clicking it changes nothing.
    pub next_enabled_at_end: bool,
    /// Global row indices whose text read always fails as stale.
    pub stale_rows: Vec<usize>,
    pub sweep_anchors: Vec<String>,
    pub subjects: Vec<String>,
    pub cookies: Vec<BrowserCookie>,
}

impl MockListing {
    pub fn with_rows(rows: Vec<MockRow>) -> Self {
        Self {
            rows,
            page_size: 25,
            page_size_options: Some(
                ["25", "50", "100"]
                    .iter()
                    .map(|n| (format!("number:{}", n), n.to_string()))
                    .collect(),
            ),
            tab_present: true,
            tab_failures: 0,
            block_native_clicks: false,
            block_scroll: false,
            next_enabled_at_end: false,
            stale_rows: Vec::new(),
            sweep_anchors: Vec::new(),
            subjects: Vec::new(),
            cookies: vec![BrowserCookie {
                name: "JSESSIONID".into(),
                value: "abc123".into(),
                domain: "emr.example".into(),
                path: "/".into(),
                secure: true,
                http_only: true,
            }],
        }
    }

    /// `pages` pages of `per_page` linked rows each.
    pub fn paged(pages: usize, per_page: usize) -> Self {
        let rows = (0..pages * per_page)
            .map(|i| {
                MockRow::linked(
                    &format!("Operative Report {}", i),
                    "Operative Reports",
                    &format!("{}/ema/secure/fileattachment/{}/op_{}.pdf", MOCK_ORIGIN, i, i),
                )
            })
            .collect();
        let mut listing = Self::with_rows(rows);
        listing.page_size = per_page;
        listing
    }
}

#[derive(Debug)]
struct MockState {
    listing: MockListing,
    tab_open: bool,
    page: usize,
    contexts: Vec<(ContextId, String)>,
    current: usize,
    next_context: u32,
    typed: String,
    search_result: Option<String>,
    subject: Option<String>,
    navigations: Vec<String>,
    closed: Vec<ContextId>,
    overlay_sweeps: u32,
    tab_clicks: u32,
    login_submitted: bool,
    /// Upcoming row text reads that fail as stale.
    stale_reads: u32,
}

impl MockState {
    fn page_count(&self) -> usize {
        let size = self.listing.page_size.max(1);
        self.listing.rows.len().div_ceil(size).max(1)
    }

    fn page_range(&self) -> std::ops::Range<usize> {
        let size = self.listing.page_size.max(1);
        let start = (self.page * size).min(self.listing.rows.len());
        let end = (start + size).min(self.listing.rows.len());
        start..end
    }

    fn on_last_page(&self) -> bool {
        self.page + 1 >= self.page_count()
    }

    /// Resolve a `p{page}/row:{i}` prefix into a global row index.
    fn row_index(&self, token: &str) -> Result<Option<usize>, UiError> {
        let Some(rest) = token.strip_prefix('p') else {
            return Ok(None);
        };
        let Some((page, rest)) = rest.split_once("/row:") else {
            return Ok(None);
        };
        let row: usize = rest
            .split('/')
            .next()
            .and_then(|r| r.parse().ok())
            .ok_or_else(|| UiError::NotFound(token.to_string()))?;
        let page: usize = page
            .parse()
            .map_err(|_| UiError::NotFound(token.to_string()))?;
        if !self.tab_open || page != self.page {
            return Err(UiError::Stale(token.to_string()));
        }
        Ok(Some(self.page_range().start + row))
    }

    fn row_token(&self, local: usize) -> ElementRef {
        ElementRef::new(format!("p{}/row:{}", self.page, local))
    }

    fn open_context(&mut self, location: String) {
        self.next_context += 1;
        let id = ContextId::new(format!("ctx-{}", self.next_context));
        self.contexts.push((id, location));
    }

    fn activate(&mut self, token: &str) -> Result<(), UiError> {
        match token {
            "tab" => {
                self.tab_clicks += 1;
                if self.listing.tab_failures > 0 {
                    self.listing.tab_failures -= 1;
                    return Err(UiError::NotInteractable("attachments tab".into()));
                }
                self.tab_open = true;
                self.page = 0;
            }
            "next" => {
                if !self.on_last_page() {
                    self.page += 1;
                }
            }
            "search:result" => {
                self.subject = self.search_result.take();
                self.tab_open = false;
            }
            "login:submit" => self.login_submitted = true,
            t if t.starts_with("anchor:") => {}
            t => {
                if let Some(global) = self.row_index(t)? {
                    let row = self.listing.rows[global].clone();
                    if t.ends_with("/link") {
                        if let Some(href) = row.link {
                            self.open_context(href);
                        }
                    } else if t.ends_with("/action") {
                        if let Some(location) = row.action_opens {
                            self.open_context(location);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// In-memory [`UiDriver`].
pub struct MockUi {
    state: Mutex<MockState>,
    site: SiteProfile,
}

impl MockUi {
    pub fn new(listing: MockListing) -> Self {
        Self {
            state: Mutex::new(MockState {
                listing,
                tab_open: false,
                page: 0,
                contexts: vec![(
                    ContextId::new("main"),
                    format!("{}/ema/web/practice/staff", MOCK_ORIGIN),
                )],
                current: 0,
                next_context: 0,
                typed: String::new(),
                search_result: None,
                subject: None,
                navigations: Vec::new(),
                closed: Vec::new(),
                overlay_sweeps: 0,
                tab_clicks: 0,
                login_submitted: false,
                stale_reads: 0,
            }),
            site: SiteProfile::default(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn open_tab_now(&self) {
        let mut s = self.state();
        s.tab_open = true;
        s.page = 0;
    }

    /// Make the next `n` row text reads fail as if the row re-rendered.
    pub fn fail_next_reads(&self, n: u32) {
        self.state().stale_reads = n;
    }

    pub fn tab_is_open(&self) -> bool {
        self.state().tab_open
    }

    pub fn tab_clicks(&self) -> u32 {
        self.state().tab_clicks
    }

    pub fn current_page(&self) -> usize {
        self.state().page
    }

    pub fn page_size(&self) -> usize {
        self.state().listing.page_size
    }

    pub fn context_count(&self) -> usize {
        self.state().contexts.len()
    }

    pub fn closed_contexts(&self) -> Vec<ContextId> {
        self.state().closed.clone()
    }

    pub fn subject(&self) -> Option<String> {
        self.state().subject.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }

    pub fn overlay_sweeps(&self) -> u32 {
        self.state().overlay_sweeps
    }

    pub fn login_submitted(&self) -> bool {
        self.state().login_submitted
    }

    fn link_matches(&self, selector: &str, href: &str) -> Option<bool> {
        let strategy = self
            .site
            .link_strategies
            .iter()
            .find(|s| s.matcher == selector)?;
        Some(match strategy.kind {
            LinkKind::AttachmentPath => href.contains("/ema/secure/fileattachment/"),
            LinkKind::FileAttachment => href.contains("fileattachment"),
            LinkKind::PdfSuffix => href.ends_with(".pdf"),
            LinkKind::AnyHref => true,
        })
    }
}

#[async_trait]
impl UiDriver for MockUi {
    async fn navigate(&self, url: &str) -> Result<(), UiError> {
        let mut s = self.state();
        s.navigations.push(url.to_string());
        let current = s.current;
        s.contexts[current].1 = url.to_string();
        s.tab_open = false;
        s.subject = None;
        s.search_result = None;
        Ok(())
    }

    async fn locate(&self, selector: &str) -> Result<Option<ElementRef>, UiError> {
        let s = self.state();
        let site = &self.site;
        let found = if selector == site.listing_tab {
            s.listing.tab_present.then(|| ElementRef::new("tab"))
        } else if selector == site.page_size.controls[0].matcher {
            (s.tab_open && s.listing.page_size_options.is_some()).then(|| ElementRef::new("select"))
        } else if selector == site.next_controls[0].matcher {
            s.tab_open.then(|| ElementRef::new("next"))
        } else if selector == site.rows && s.tab_open {
            (!s.page_range().is_empty()).then(|| s.row_token(0))
        } else if selector == site.search.result_row {
            s.search_result.as_ref().map(|_| ElementRef::new("search:result"))
        } else if selector == site.search.combo {
            Some(ElementRef::new("search:combo"))
        } else if selector == site.search.input {
            Some(ElementRef::new("search:input"))
        } else if selector == site.search.ready {
            s.subject.as_ref().map(|_| ElementRef::new("ready"))
        } else if let Some(login) = &site.login {
            if Some(selector) == login.landing.as_deref() {
                Some(ElementRef::new("login:landing"))
            } else if selector == login.username {
                Some(ElementRef::new("login:username"))
            } else if selector == login.password {
                Some(ElementRef::new("login:password"))
            } else if selector == login.submit {
                Some(ElementRef::new("login:submit"))
            } else {
                None
            }
        } else {
            None
        };
        Ok(found)
    }

    async fn locate_all(&self, selector: &str) -> Result<Vec<ElementRef>, UiError> {
        {
            let s = self.state();
            if selector == self.site.rows && s.tab_open {
                return Ok(s.page_range().enumerate().map(|(i, _)| s.row_token(i)).collect());
            }
            if selector == self.site.sweep.anchors {
                if !s.tab_open {
                    return Ok(Vec::new());
                }
                return Ok((0..s.listing.sweep_anchors.len())
                    .map(|k| ElementRef::new(format!("anchor:{}", k)))
                    .collect());
            }
        }
        Ok(self.locate(selector).await?.into_iter().collect())
    }

    async fn locate_within(
        &self,
        parent: &ElementRef,
        selector: &str,
    ) -> Result<Option<ElementRef>, UiError> {
        let s = self.state();
        let Some(global) = s.row_index(&parent.0)? else {
            return Ok(None);
        };
        let row = &s.listing.rows[global];

        if selector == self.site.cells {
            return Ok(Some(ElementRef::new(format!("{}/cell:0", parent.0))));
        }
        if let Some(href) = &row.link {
            if self.link_matches(selector, href) == Some(true) {
                return Ok(Some(ElementRef::new(format!("{}/link", parent.0))));
            }
        }
        let action = self
            .site
            .action_strategies
            .iter()
            .find(|a| a.matcher == selector)
            .map(|a| a.kind);
        if action == Some(ActionKind::ExplicitAction) && row.has_action {
            return Ok(Some(ElementRef::new(format!("{}/action", parent.0))));
        }
        Ok(None)
    }

    async fn locate_all_within(
        &self,
        parent: &ElementRef,
        selector: &str,
    ) -> Result<Vec<ElementRef>, UiError> {
        if selector == self.site.cells {
            let s = self.state();
            let Some(global) = s.row_index(&parent.0)? else {
                return Ok(Vec::new());
            };
            return Ok((0..s.listing.rows[global].cells.len())
                .map(|j| ElementRef::new(format!("{}/cell:{}", parent.0, j)))
                .collect());
        }
        Ok(self
            .locate_within(parent, selector)
            .await?
            .into_iter()
            .collect())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), UiError> {
        let mut s = self.state();
        if s.listing.block_native_clicks {
            return Err(UiError::NotInteractable(element.0.clone()));
        }
        s.activate(&element.0)
    }

    async fn read_text(&self, element: &ElementRef) -> Result<String, UiError> {
        let mut s = self.state();
        let token = element.0.as_str();
        match token {
            "tab" => return Ok("Attachments".into()),
            "next" => return Ok("Next".into()),
            _ => {}
        }
        let Some(global) = s.row_index(token)? else {
            return Err(UiError::NotFound(token.to_string()));
        };
        if s.stale_reads > 0 {
            s.stale_reads -= 1;
            return Err(UiError::Stale(token.to_string()));
        }
        if s.listing.stale_rows.contains(&global) {
            return Err(UiError::Stale(token.to_string()));
        }
        let row = &s.listing.rows[global];
        if let Some((_, cell)) = token.rsplit_once("/cell:") {
            let j: usize = cell.parse().map_err(|_| UiError::NotFound(token.to_string()))?;
            return Ok(row.cells.get(j).cloned().unwrap_or_default());
        }
        Ok(row.cells.join(" ").trim().to_string())
    }

    async fn read_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, UiError> {
        let s = self.state();
        let token = element.0.as_str();
        if token == "next" {
            return Ok(match name {
                "class" if s.on_last_page() && !s.listing.next_enabled_at_end => {
                    Some("pagination-next disabled".into())
                }
                "class" => Some("pagination-next".into()),
                _ => None,
            });
        }
        if let Some(k) = token.strip_prefix("anchor:") {
            let k: usize = k.parse().map_err(|_| UiError::NotFound(token.to_string()))?;
            return Ok((name == "href")
                .then(|| s.listing.sweep_anchors.get(k).cloned())
                .flatten());
        }
        if token.ends_with("/link") && name == "href" {
            if let Some(global) = s.row_index(token)? {
                return Ok(s.listing.rows[global].link.clone());
            }
        }
        Ok(None)
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), UiError> {
        if element.0 == "search:input" {
            self.state().typed.push_str(text);
        }
        Ok(())
    }

    async fn press_enter(&self, element: &ElementRef) -> Result<(), UiError> {
        let mut s = self.state();
        if element.0 == "search:input" {
            let typed = std::mem::take(&mut s.typed);
            if s.listing.subjects.contains(&typed) {
                s.search_result = Some(typed);
            }
        }
        Ok(())
    }

    async fn select_option(
        &self,
        select: &ElementRef,
        choice: &OptionChoice,
    ) -> Result<Option<String>, UiError> {
        let mut s = self.state();
        if select.0 != "select" {
            return Err(UiError::NotFound(select.0.clone()));
        }
        let Some(options) = s.listing.page_size_options.clone() else {
            return Err(UiError::NotFound("page size control".into()));
        };
        let picked = match choice {
            OptionChoice::Value(v) => options.iter().find(|(value, _)| value == v),
            OptionChoice::Label(l) => options.iter().find(|(_, label)| label == l),
            OptionChoice::Last => options.last(),
        };
        let Some((_, label)) = picked else {
            return Ok(None);
        };
        if let Ok(size) = label.parse() {
            s.listing.page_size = size;
            s.page = 0;
        }
        Ok(Some(label.clone()))
    }

    async fn execute(&self, script: &str, receiver: Option<&ElementRef>) -> Result<Value, UiError> {
        let mut s = self.state();
        match receiver {
            Some(el) if script == scripts::SCROLL_INTO_VIEW && s.listing.block_scroll => {
                Err(UiError::Script(format!("cannot scroll {}", el.0)))
            }
            Some(el) if script == scripts::CLICK => {
                s.activate(&el.0)?;
                Ok(Value::Null)
            }
            Some(el) => {
                s.row_index(&el.0)?;
                Ok(Value::Null)
            }
            None if script.contains("querySelectorAll") => {
                s.overlay_sweeps += 1;
                Ok(Value::from(0))
            }
            None => Ok(Value::Null),
        }
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>, UiError> {
        Ok(self.state().listing.cookies.clone())
    }

    async fn current_context(&self) -> Result<ContextId, UiError> {
        let s = self.state();
        Ok(s.contexts[s.current].0.clone())
    }

    async fn contexts(&self) -> Result<Vec<ContextId>, UiError> {
        Ok(self.state().contexts.iter().map(|(id, _)| id.clone()).collect())
    }

    async fn switch_context(&self, id: &ContextId) -> Result<(), UiError> {
        let mut s = self.state();
        let idx = s
            .contexts
            .iter()
            .position(|(c, _)| c == id)
            .ok_or_else(|| UiError::NoSuchContext(id.to_string()))?;
        s.current = idx;
        Ok(())
    }

    async fn close_context(&self, id: &ContextId) -> Result<(), UiError> {
        let mut s = self.state();
        let idx = s
            .contexts
            .iter()
            .position(|(c, _)| c == id)
            .ok_or_else(|| UiError::NoSuchContext(id.to_string()))?;
        s.contexts.remove(idx);
        s.closed.push(id.clone());
        if s.current >= idx && s.current > 0 {
            s.current -= 1;
        }
        Ok(())
    }

    async fn current_location(&self) -> Result<Option<String>, UiError> {
        let s = self.state();
        Ok(Some(s.contexts[s.current].1.clone()))
    }
}
