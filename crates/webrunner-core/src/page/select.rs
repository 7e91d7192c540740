//! Minimal CSS-subset selection over raw HTML.
//!
//! Supports `tag`, `#id`, `.class`, `tag.class`, and `tag#id` selectors,
//! which covers what the extraction actions and the oracle's suggested
//! selectors use in practice. Anything richer belongs in a real browser
//! provider.

use regex::Regex;

use super::{collapse_ws, strip_tags};

#[derive(Debug, Default)]
struct ParsedSelector {
    tag: Option<String>,
    id: Option<String>,
    class: Option<String>,
}

fn parse_selector(selector: &str) -> ParsedSelector {
    let mut parsed = ParsedSelector::default();
    let mut rest = selector.trim();

    if let Some(pos) = rest.find(['#', '.']) {
        if pos > 0 {
            parsed.tag = Some(rest[..pos].to_string());
        }
        rest = &rest[pos..];
    } else {
        parsed.tag = Some(rest.to_string());
        rest = "";
    }

    if let Some(id) = rest.strip_prefix('#') {
        parsed.id = Some(id.to_string());
    } else if let Some(class) = rest.strip_prefix('.') {
        parsed.class = Some(class.to_string());
    }
    parsed
}

fn element_regex(parsed: &ParsedSelector) -> Option<Regex> {
    let tag = match &parsed.tag {
        Some(tag) if !tag.is_empty() => regex::escape(tag),
        _ => String::from(r"[a-zA-Z][a-zA-Z0-9]*"),
    };

    let attr_filter = if let Some(id) = &parsed.id {
        format!(
            r#"[^>]*\bid\s*=\s*["']{}["'][^>]*"#,
            regex::escape(id)
        )
    } else if let Some(class) = &parsed.class {
        format!(
            r#"[^>]*\bclass\s*=\s*["'][^"']*\b{}\b[^"']*["'][^>]*"#,
            regex::escape(class)
        )
    } else {
        String::from("[^>]*")
    };

    Regex::new(&format!(
        r"(?is)<({tag})\b{attr_filter}>(.*?)</({tag})>"
    ))
    .ok()
}

/// Text contents of elements matching the selector. With `multiple` false
/// only the first match is returned.
pub fn select_texts(html: &str, selector: &str, multiple: bool) -> Vec<String> {
    let parsed = parse_selector(selector);
    let Some(regex) = element_regex(&parsed) else {
        return Vec::new();
    };
    let limit = if multiple { usize::MAX } else { 1 };
    regex
        .captures_iter(html)
        .filter_map(|cap| cap.get(2).map(|m| collapse_ws(&strip_tags(m.as_str()))))
        .filter(|text| !text.is_empty())
        .take(limit)
        .collect()
}

/// Attribute values of elements matching the selector.
pub fn select_attr_values(html: &str, selector: &str, attribute: &str, multiple: bool) -> Vec<String> {
    let parsed = parse_selector(selector);
    let tag = match &parsed.tag {
        Some(tag) if !tag.is_empty() => regex::escape(tag),
        _ => String::from(r"[a-zA-Z][a-zA-Z0-9]*"),
    };

    let constraint = if let Some(id) = &parsed.id {
        format!(r#"\bid\s*=\s*["']{}["']"#, regex::escape(id))
    } else if let Some(class) = &parsed.class {
        format!(
            r#"\bclass\s*=\s*["'][^"']*\b{}\b[^"']*["']"#,
            regex::escape(class)
        )
    } else {
        String::new()
    };

    let Ok(open_tag) = Regex::new(&format!(r"(?is)<{tag}\b[^>]*>")) else {
        return Vec::new();
    };
    let Ok(constraint_re) = Regex::new(&format!("(?is){constraint}")) else {
        return Vec::new();
    };
    let Ok(attr_re) = Regex::new(&format!(
        r#"(?is)\b{}\s*=\s*["']([^"']*)["']"#,
        regex::escape(attribute)
    )) else {
        return Vec::new();
    };

    let limit = if multiple { usize::MAX } else { 1 };
    open_tag
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag_text| constraint.is_empty() || constraint_re.is_match(tag_text))
        .filter_map(|tag_text| {
            attr_re
                .captures(tag_text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
        .take(limit)
        .collect()
}
