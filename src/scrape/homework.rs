//! Homework HTML scraper (C6): parses one homework response into `(lesson_id, markdown)`.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static LESSON_ID_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[id^="LektionsID"]"#).unwrap());
static BOLD_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("b").unwrap());

const HOMEWORK_HEADER: &str = "Heimaarbeiði";

static COLLAPSE_TRAILING_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" +\n").unwrap());
static COLLAPSE_LEADING_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n +").unwrap());

/// Parses a homework response body. Returns `None` when there is no lesson id, no matching
/// `Heimaarbeiði` header, or the resulting markdown is empty.
pub fn parse(html: &str) -> Option<(String, String)> {
    let document = Html::parse_document(html);

    let lesson_id = document
        .select(&LESSON_ID_SELECTOR)
        .next()
        .and_then(|el| el.value().attr("value"))
        .filter(|v| !v.is_empty())?
        .to_string();

    let header = document
        .select(&BOLD_SELECTOR)
        .find(|el| el.text().collect::<String>().trim() == HOMEWORK_HEADER)?;

    let parent = header.parent()?;
    let parent_el = ElementRef::wrap(parent).filter(|el| el.value().name() == "p")?;

    let markdown = render_homework_block(parent_el, header.id());
    let markdown = normalize_whitespace(&markdown);

    if markdown.is_empty() {
        None
    } else {
        Some((lesson_id, markdown))
    }
}

fn render_homework_block(block: ElementRef, header_id: ego_tree::NodeId) -> String {
    let mut children = block.children().peekable();
    let mut out = String::new();
    let mut seen_header = false;
    let mut skipped_trailing_br = false;

    while let Some(child) = children.next() {
        if !seen_header {
            if child.id() == header_id {
                seen_header = true;
                if !skipped_trailing_br {
                    if let Some(next) = children.peek() {
                        if let Some(next_el) = ElementRef::wrap(*next) {
                            if next_el.value().name() == "br" {
                                children.next();
                                skipped_trailing_br = true;
                            }
                        }
                    }
                }
            }
            continue;
        }
        out.push_str(&render_node(child));
    }

    out
}

fn render_node(node: ego_tree::NodeRef<scraper::Node>) -> String {
    match node.value() {
        scraper::Node::Text(text) => text.to_string(),
        scraper::Node::Element(element) => {
            let inner: String = node.children().map(render_node).collect();
            match element.name() {
                "br" => "\n".to_string(),
                "b" | "strong" => format!("**{}**", inner.trim()),
                "i" | "em" => format!("*{}*", inner.trim()),
                _ => inner,
            }
        }
        _ => String::new(),
    }
}

fn normalize_whitespace(s: &str) -> String {
    let s = COLLAPSE_TRAILING_SPACE.replace_all(s, "\n");
    let s = COLLAPSE_LEADING_SPACE.replace_all(&s, "\n");
    s.trim().to_string()
}
