//! Page-state extraction
//!
//! Reduces raw HTML into the bounded record the AI oracle is allowed to
//! see: simplified markup, top links/forms/clickables, and a slice of
//! visible text. Raw HTML is never forwarded uncapped.

mod select;

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub use select::{select_attr_values, select_texts};

const TRUNCATION_MARKER: &str = "... [truncated]";

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

static SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
static STYLE_RE: OnceLock<Regex> = OnceLock::new();
static COMMENT_RE: OnceLock<Regex> = OnceLock::new();
static TAG_RE: OnceLock<Regex> = OnceLock::new();
static WS_RE: OnceLock<Regex> = OnceLock::new();
static TITLE_RE: OnceLock<Regex> = OnceLock::new();
static ANCHOR_RE: OnceLock<Regex> = OnceLock::new();
static FORM_RE: OnceLock<Regex> = OnceLock::new();
static INPUT_RE: OnceLock<Regex> = OnceLock::new();
static BUTTON_RE: OnceLock<Regex> = OnceLock::new();
static ATTR_ACTION_RE: OnceLock<Regex> = OnceLock::new();
static ATTR_METHOD_RE: OnceLock<Regex> = OnceLock::new();
static ATTR_NAME_RE: OnceLock<Regex> = OnceLock::new();
static ATTR_TYPE_RE: OnceLock<Regex> = OnceLock::new();

/// A link surfaced to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLink {
    pub href: String,
    pub text: String,
}

/// One input of a surfaced form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInput {
    pub name: String,
    pub input_type: String,
}

/// A form surfaced to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageForm {
    pub action: String,
    pub method: String,
    pub inputs: Vec<FormInput>,
}

/// Bounded description of the current page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub simplified_html: String,
    pub links: Vec<PageLink>,
    pub forms: Vec<PageForm>,
    pub clickables: Vec<String>,
    pub visible_text: String,
}

/// Caps applied during extraction.
#[derive(Debug, Clone)]
pub struct PageLimits {
    pub simplified_html_bytes: usize,
    pub max_links: usize,
    pub max_forms: usize,
    pub max_clickables: usize,
    pub visible_text_bytes: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            simplified_html_bytes: 50 * 1024,
            max_links: 20,
            max_forms: 5,
            max_clickables: 10,
            visible_text_bytes: 2 * 1024,
        }
    }
}

/// Turns raw HTML into a bounded [`PageState`].
#[derive(Debug, Clone, Default)]
pub struct PageStateExtractor {
    limits: PageLimits,
}

impl PageStateExtractor {
    /// Create an extractor with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an extractor with custom limits.
    pub fn with_limits(limits: PageLimits) -> Self {
        Self { limits }
    }

    /// Extract the bounded state of a page.
    pub fn extract(&self, url: &str, html: &str) -> PageState {
        let simplified = simplify_html(html);
        let base = Url::parse(url).ok();

        PageState {
            url: url.to_string(),
            title: extract_title(html),
            links: self.extract_links(html, base.as_ref()),
            forms: self.extract_forms(html),
            clickables: self.extract_clickables(html),
            visible_text: truncate_bytes(&visible_text(&simplified), self.limits.visible_text_bytes),
            simplified_html: truncate_bytes(&simplified, self.limits.simplified_html_bytes),
        }
    }

    fn extract_links(&self, html: &str, base: Option<&Url>) -> Vec<PageLink> {
        let anchor = re(
            &ANCHOR_RE,
            r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#,
        );
        anchor
            .captures_iter(html)
            .filter_map(|cap| {
                let raw_href = cap.get(1)?.as_str().trim();
                if raw_href.is_empty() || raw_href.starts_with('#') {
                    return None;
                }
                let href = match base {
                    Some(base) => base
                        .join(raw_href)
                        .map(|u| u.to_string())
                        .unwrap_or_else(|_| raw_href.to_string()),
                    None => raw_href.to_string(),
                };
                Some(PageLink {
                    href,
                    text: collapse_ws(&strip_tags(cap.get(2)?.as_str())),
                })
            })
            .take(self.limits.max_links)
            .collect()
    }

    fn extract_forms(&self, html: &str) -> Vec<PageForm> {
        let form = re(&FORM_RE, r"(?is)<form\b([^>]*)>(.*?)</form>");
        let input = re(&INPUT_RE, r"(?is)<input\b[^>]*>");
        let action = re(&ATTR_ACTION_RE, r#"(?i)action\s*=\s*["']([^"']*)["']"#);
        let method = re(&ATTR_METHOD_RE, r#"(?i)method\s*=\s*["']([^"']*)["']"#);
        let name = re(&ATTR_NAME_RE, r#"(?i)name\s*=\s*["']([^"']*)["']"#);
        let input_type = re(&ATTR_TYPE_RE, r#"(?i)type\s*=\s*["']([^"']*)["']"#);

        form.captures_iter(html)
            .map(|cap| {
                let attrs = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
                let body = cap.get(2).map(|m| m.as_str()).unwrap_or_default();
                let inputs = input
                    .find_iter(body)
                    .filter_map(|m| {
                        let tag = m.as_str();
                        let field = name.captures(tag)?.get(1)?.as_str().to_string();
                        let kind = input_type
                            .captures(tag)
                            .and_then(|c| c.get(1))
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_else(|| "text".to_string());
                        Some(FormInput {
                            name: field,
                            input_type: kind,
                        })
                    })
                    .collect();
                PageForm {
                    action: action
                        .captures(attrs)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                    method: method
                        .captures(attrs)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_uppercase())
                        .unwrap_or_else(|| "GET".to_string()),
                    inputs,
                }
            })
            .take(self.limits.max_forms)
            .collect()
    }

    fn extract_clickables(&self, html: &str) -> Vec<String> {
        let button = re(
            &BUTTON_RE,
            r#"(?is)<button\b[^>]*>(.*?)</button>|<[^>]+role\s*=\s*["']button["'][^>]*>"#,
        );
        button
            .captures_iter(html)
            .map(|cap| match cap.get(1) {
                Some(inner) => collapse_ws(&strip_tags(inner.as_str())),
                None => "[role=button]".to_string(),
            })
            .filter(|text| !text.is_empty())
            .take(self.limits.max_clickables)
            .collect()
    }
}

/// Strip script/style/comments and collapse whitespace.
pub fn simplify_html(html: &str) -> String {
    let script = re(&SCRIPT_RE, r"(?is)<script\b.*?</script>");
    let style = re(&STYLE_RE, r"(?is)<style\b.*?</style>");
    let comment = re(&COMMENT_RE, r"(?s)<!--.*?-->");

    let cleaned = script.replace_all(html, " ");
    let cleaned = style.replace_all(&cleaned, " ");
    let cleaned = comment.replace_all(&cleaned, " ");
    collapse_ws(&cleaned)
}

/// Text content of simplified markup.
fn visible_text(simplified: &str) -> String {
    collapse_ws(&strip_tags(simplified))
}

fn extract_title(html: &str) -> String {
    re(&TITLE_RE, r"(?is)<title[^>]*>(.*?)</title>")
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| collapse_ws(m.as_str()))
        .unwrap_or_default()
}

fn strip_tags(html: &str) -> String {
    re(&TAG_RE, r"(?s)<[^>]*>").replace_all(html, " ").to_string()
}

fn collapse_ws(text: &str) -> String {
    re(&WS_RE, r"\s+").replace_all(text.trim(), " ").to_string()
}

/// Truncate on a char boundary, appending an explicit marker.
pub fn truncate_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes.saturating_sub(TRUNCATION_MARKER.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <html>
          <head>
            <title>Shop &mdash; Results</title>
            <style>.x { color: red }</style>
            <script>var tracking = "evil";</script>
          </head>
          <body>
            <!-- promo banner -->
            <a href="/item/1">iPhone 14</a>
            <a href="https://other.example/deal">Deal</a>
            <a href="#top">Back to top</a>
            <form action="/search" method="get">
              <input name="q" type="text">
              <input name="page" type="hidden">
            </form>
            <button>Add to cart</button>
            <div class="price">$899</div>
          </body>
        </html>"##;

    #[test]
    fn test_simplification_strips_script_style_comments() {
        let simplified = simplify_html(PAGE);
        assert!(!simplified.contains("tracking"));
        assert!(!simplified.contains("color: red"));
        assert!(!simplified.contains("promo banner"));
        assert!(simplified.contains("$899"));
    }

    #[test]
    fn test_extract_builds_bounded_state() {
        let extractor = PageStateExtractor::new();
        let state = extractor.extract("https://shop.example/s?q=iphone", PAGE);

        assert_eq!(state.title, "Shop &mdash; Results");
        // Fragment-only links are dropped; relative links are resolved.
        assert_eq!(state.links.len(), 2);
        assert_eq!(state.links[0].href, "https://shop.example/item/1");
        assert_eq!(state.links[0].text, "iPhone 14");
        assert_eq!(state.forms.len(), 1);
        assert_eq!(state.forms[0].method, "GET");
        assert_eq!(state.forms[0].inputs.len(), 2);
        assert_eq!(state.clickables, vec!["Add to cart".to_string()]);
        assert!(state.visible_text.contains("$899"));
    }

    #[test]
    fn test_limits_cap_collections() {
        let mut html = String::from("<html><body>");
        for i in 0..40 {
            html.push_str(&format!("<a href=\"/l{i}\">link {i}</a>"));
        }
        html.push_str("</body></html>");

        let state = PageStateExtractor::new().extract("https://x.example/", &html);
        assert_eq!(state.links.len(), 20);
    }

    #[test]
    fn test_truncation_appends_marker_on_char_boundary() {
        let text = "ää".repeat(100);
        let out = truncate_bytes(&text, 50);
        assert!(out.len() <= 50);
        assert!(out.ends_with(TRUNCATION_MARKER));

        let untouched = truncate_bytes("short", 50);
        assert_eq!(untouched, "short");
    }
}
