//! JavaScript snippets dispatched through [`super::UiDriver::execute`].

/// Receiver script: center the element in the viewport.
pub const SCROLL_INTO_VIEW: &str = "function() { this.scrollIntoView({block: 'center'}); }";

/// Receiver script: dispatch a synthetic click.
pub const CLICK: &str = "function() { this.click(); }";

/// Page script removing every element that matches any selector.
pub fn remove_all(selectors: &[String]) -> String {
    let list = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        "(() => {{ let n = 0; for (const sel of {}) {{ \
         document.querySelectorAll(sel).forEach(el => {{ el.remove(); n++; }}); }} \
         return n; }})()",
        list
    )
}

/// Receiver script selecting an option on a `<select>` and firing `change`.
///
/// `mode` is `"value"`, `"label"`, or `"last"`. Returns the selected label,
/// or `null` when nothing matched.
pub fn select_option(mode: &str, needle: &str) -> String {
    let mode = serde_json::to_string(mode).unwrap_or_else(|_| "\"last\"".to_string());
    let needle = serde_json::to_string(needle).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "function() {{ \
         const mode = {mode}; const needle = {needle}; \
         const opts = Array.from(this.options); \
         let idx = -1; \
         if (mode === 'value') idx = opts.findIndex(o => o.value === needle); \
         else if (mode === 'label') idx = opts.findIndex(o => o.text.trim() === needle); \
         else idx = opts.length - 1; \
         if (idx < 0) return null; \
         this.selectedIndex = idx; \
         this.dispatchEvent(new Event('input', {{bubbles: true}})); \
         this.dispatchEvent(new Event('change', {{bubbles: true}})); \
         return opts[idx].text.trim(); }}"
    )
}
