//! Extraction pipeline: fetched document -> normalized string.
//!
//! Selection first (CSS, JSON path, or the visible body text), then trimming,
//! then filters. With filters configured the result is the list of filters
//! found in the text, in configuration order, joined by `" | "`; with none
//! found it is "".

use super::json_path;
use super::Selector;
use crate::error::{Error, Result};
use crate::fetch::ContentStream;
use scraper::{Html, Node, Selector as CssSelector};

pub const FILTER_SEPARATOR: &str = " | ";

/// Read the stream and run the whole pipeline on it.
pub async fn extract_stream(
    stream: ContentStream,
    selector: &Selector,
    filters: &[String],
) -> Result<String> {
    let body = stream.into_string().await?;
    let selected = select(&body, selector)?;
    Ok(apply_filters(&selected, filters))
}

/// Apply the selector and trim the result.
pub fn select(document: &str, selector: &Selector) -> Result<String> {
    let text = match selector {
        Selector::None => visible_body_text(document)?,
        Selector::Css(paths) => css_text(document, paths)?,
        Selector::Json(paths) => json_text(document, paths)?,
    };
    Ok(text.trim().to_string())
}

/// Collapse text into the filters it contains. No filters leaves it unchanged.
pub fn apply_filters(text: &str, filters: &[String]) -> String {
    if filters.is_empty() {
        return text.to_string();
    }
    filters
        .iter()
        .filter(|f| text.contains(f.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(FILTER_SEPARATOR)
}

fn parse_css(selector: &str) -> Result<CssSelector> {
    CssSelector::parse(selector).map_err(|e| Error::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Concatenated text of every match, one line per selector.
fn css_text(document: &str, selectors: &[String]) -> Result<String> {
    let html = Html::parse_document(document);
    let mut results = Vec::with_capacity(selectors.len());
    for raw in selectors {
        let selector = parse_css(raw)?;
        let text: String = html.select(&selector).flat_map(|el| el.text()).collect();
        results.push(text);
    }
    Ok(results.join("\n"))
}

/// Text of `<body>` without the contents of `<script>` elements.
fn visible_body_text(document: &str) -> Result<String> {
    let html = Html::parse_document(document);
    let body_selector = parse_css("body")?;
    let Some(body) = html.select(&body_selector).next() else {
        return Ok(String::new());
    };

    let mut text = String::new();
    for node in body.descendants() {
        if let Node::Text(fragment) = node.value() {
            let in_script = node.ancestors().any(
                |ancestor| matches!(ancestor.value(), Node::Element(el) if el.name() == "script"),
            );
            if !in_script {
                text.push_str(fragment);
            }
        }
    }
    Ok(text)
}

fn json_text(document: &str, paths: &[String]) -> Result<String> {
    let root: serde_json::Value = serde_json::from_str(document)
        .map_err(|e| Error::Extract(format!("response is not valid JSON: {}", e)))?;
    let results: Vec<String> = paths
        .iter()
        .map(|path| json_path::render(json_path::query(&root, path).as_ref()))
        .collect();
    Ok(results.join("\n"))
}
