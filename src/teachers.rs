//! Teacher map cache (C4): process-wide TTL cache of `initials -> full name`.
//!
//! Backed by a single-entry `moka` cache keyed by the unit type, acceptable because the
//! mapping is the same for every session of the same upstream tenant (spec §9's open question
//! about multi-tenant keying is not addressed here; see `DESIGN.md`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::session::Session;
use crate::transport::Transport;

pub type TeacherMap = Arc<HashMap<String, String>>;

pub struct TeacherCache {
    cache: moka::sync::Cache<(), TeacherMap>,
}

static OPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("select option").unwrap());

static ANCHOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^()<>]+?)\s*\(\s*<a[^>]*>([A-Z]{2,4})</a>\s*\)").unwrap());
static PLAIN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^()<>]+?)\s*\(\s*([A-Z]{2,4})\s*\)").unwrap());

impl TeacherCache {
    pub fn new(ttl_sec: u64) -> Self {
        Self {
            cache: moka::sync::Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(ttl_sec))
                .build(),
        }
    }

    /// Returns the cached map, populating it on miss. Parsing failure is tolerated and cached
    /// as an empty map for the TTL window; the orchestrator falls back to initials as names.
    pub async fn get(&self, transport: &Transport, session: &Session) -> TeacherMap {
        if let Some(existing) = self.cache.get(&()) {
            return existing;
        }

        let map = fetch_teacher_map(transport, session)
            .await
            .unwrap_or_default();
        let map = Arc::new(map);
        self.cache.insert((), map.clone());
        map
    }
}

async fn fetch_teacher_map(
    transport: &Transport,
    session: &Session,
) -> Option<HashMap<String, String>> {
    let timer = session.fresh_timer();
    let response = transport
        .post_form(
            "/i/teachers.asp",
            &session.cookie_header,
            &[("fname", "Henry"), ("lname", &session.lname), ("timer", &timer)],
            None,
        )
        .await
        .ok()?;

    Some(parse_teacher_html(&response.body))
}

fn parse_teacher_html(html: &str) -> HashMap<String, String> {
    let from_select = parse_teacher_select(html);
    if !from_select.is_empty() {
        return from_select;
    }

    let mut map = HashMap::new();
    for caps in ANCHOR_PATTERN.captures_iter(html) {
        map.insert(caps[2].to_string(), caps[1].trim().to_string());
    }
    if !map.is_empty() {
        return map;
    }
    for caps in PLAIN_PATTERN.captures_iter(html) {
        map.insert(caps[2].to_string(), caps[1].trim().to_string());
    }
    map
}

fn parse_teacher_select(html: &str) -> HashMap<String, String> {
    let document = Html::parse_document(html);
    let mut map = HashMap::new();
    for option in document.select(&OPTION_SELECTOR) {
        let Some(value) = option.value().attr("value") else {
            continue;
        };
        if value.is_empty() || value == "-1" {
            continue;
        }
        let text: String = option.text().collect::<String>().trim().to_string();
        if text.is_empty() {
            continue;
        }
        map.insert(value.to_string(), text);
    }
    map
}

/// Looks up a teacher's full name, falling back to the initials themselves when unknown.
pub fn resolve(map: &TeacherMap, initials: &str) -> String {
    map.get(initials).cloned().unwrap_or_else(|| initials.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_options_parsed_and_filtered() {
        let html = r#"
            <select>
                <option value="BIJ">Brynjálvur I. Johansen</option>
                <option value="-1">-- pick one --</option>
                <option value="">empty</option>
            </select>
        "#;
        let map = parse_teacher_html(html);
        assert_eq!(map.get("BIJ").unwrap(), "Brynjálvur I. Johansen");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn falls_back_to_anchor_regex_when_no_select() {
        let html = "Brynjálvur I. Johansen ( <a href=\"#\">BIJ</a> )";
        let map = parse_teacher_html(html);
        assert_eq!(map.get("BIJ").unwrap(), "Brynjálvur I. Johansen");
    }

    #[test]
    fn falls_back_to_plain_regex_when_no_anchor() {
        let html = "Brynjálvur I. Johansen ( BIJ )";
        let map = parse_teacher_html(html);
        assert_eq!(map.get("BIJ").unwrap(), "Brynjálvur I. Johansen");
    }

    #[test]
    fn unknown_initials_resolve_to_themselves() {
        let map: TeacherMap = Arc::new(HashMap::new());
        assert_eq!(resolve(&map, "XYZ"), "XYZ");
    }

    #[test]
    fn parse_failure_yields_empty_map() {
        assert!(parse_teacher_html("<html>nothing to see</html>").is_empty());
    }
}
