//! Offset discovery (C7): the set of week offsets available from a base week's HTML.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static V_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"v=(-?\d+)").unwrap());

/// Returns the sorted, deduplicated set of offsets appearing as `v=N` in an `onclick`
/// attribute anywhere in the document.
pub fn discover(html: &str) -> Vec<i32> {
    let document = Html::parse_document(html);
    let mut offsets: Vec<i32> = document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|a| a.value().attr("onclick"))
        .filter_map(|onclick| V_PATTERN.captures(onclick))
        .filter_map(|caps| caps[1].parse::<i32>().ok())
        .collect();

    offsets.sort_unstable();
    offsets.dedup();
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_and_dedupes_and_sorts() {
        let html = r#"
            <a onclick="go(v=2)">+2</a>
            <a onclick="go(v=-1)">-1</a>
            <a onclick="go(v=0)">current</a>
            <a onclick="go(v=-1)">dup</a>
        "#;
        assert_eq!(discover(html), vec![-1, 0, 2]);
    }

    #[test]
    fn returns_empty_when_no_matches() {
        assert!(discover("<a onclick=\"doThing()\">x</a>").is_empty());
        assert!(discover("<p>no anchors</p>").is_empty());
    }
}
