//! Session bootstrap (C2): reconstructs the upstream session from caller-supplied cookies.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AdapterError, AdapterResult};
use crate::transport::{parse_cookie_string, Transport};
use crate::util::mint_timer;

pub(crate) const BASE_TIMETABLE_PATH: &str = "/132n/";

/// A transient, per-request session. Shared read-only by every fan-out task; destroyed at
/// request end.
pub struct Session {
    /// The cookie string as originally forwarded by the caller, re-sent verbatim on every
    /// outbound call.
    pub cookie_header: String,
    /// `lname`, extracted from the base page and stable for the request's lifetime.
    pub lname: String,
    /// The raw base page HTML, kept around for offset discovery (C7).
    pub base_page_html: String,
}

impl Session {
    /// Mints a fresh `timer`/`timex` nonce for an individual outbound call. `lname` is *not*
    /// re-minted; it stays constant across the whole session's lifetime.
    pub fn fresh_timer(&self) -> String {
        mint_timer()
    }
}

// Ordered list of `lname` extraction patterns; the first to match wins (spec §4.2/§8). Pattern
// 1's `[?&]?` prefix is optional so a bare query-string-style `lname=...` (not just one
// preceded by `?`/`&`) matches too; its capture class stops at `<`/`,` so it never swallows a
// neighboring tag or needs the comma-truncation step below to do the work alone.
static LNAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"[?&]?lname=([^&"'\s<,]+)"#).unwrap(),
        Regex::new(r#"xmlhttp\.send\([^)]*lname=([^&"'\s]+)"#).unwrap(),
        Regex::new(r#"MyUpdate\('[^']*',[^,]*,\s*(\d+)\s*\)"#).unwrap(),
        Regex::new(r#"name="lname"\s+value="([^"]+)""#).unwrap(),
    ]
});

fn extract_lname(html: &str) -> Option<String> {
    for pattern in LNAME_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(html) {
            let raw = caps.get(1)?.as_str();
            let truncated = raw.split(',').next().unwrap_or(raw);
            if !truncated.is_empty() {
                return Some(truncated.to_string());
            }
        }
    }
    None
}

/// Validates and normalizes a caller-supplied cookie string, rejecting an empty parse result.
pub fn validate_cookie_string(raw: &str) -> AdapterResult<String> {
    let pairs = parse_cookie_string(raw);
    if pairs.is_empty() {
        return Err(AdapterError::InputError(
            "no valid cookie pairs found in request".to_string(),
        ));
    }
    let rebuilt = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ");
    Ok(rebuilt)
}

/// Issues a single GET to the base timetable page with `follow_redirects=false`, so a bounce
/// to a login page surfaces as a non-200 status rather than silently following it, then
/// extracts `lname`.
pub async fn bootstrap(transport: &Transport, cookies_string: &str) -> AdapterResult<Session> {
    let cookie_header = validate_cookie_string(cookies_string)?;

    let response = transport
        .get(BASE_TIMETABLE_PATH, &cookie_header, false, None)
        .await;

    let response = match response {
        Ok(r) => r,
        Err(AdapterError::UpstreamStatusError { status, .. }) if (300..400).contains(&status) => {
            return Err(AdapterError::AuthError(
                "upstream redirected the bootstrap request to a login page".to_string(),
            ));
        }
        Err(e) => return Err(e),
    };

    let lname = extract_lname(&response.body).ok_or_else(|| {
        AdapterError::UpstreamProtocolError("session parameter missing".to_string())
    })?;
    if lname.is_empty() {
        return Err(AdapterError::UpstreamProtocolError(
            "session parameter missing".to_string(),
        ));
    }

    Ok(Session {
        cookie_header,
        lname,
        base_page_html: response.body,
    })
}

/// Builds the `HashMap` view of cookies used by components that need to inspect, rather than
/// just forward, individual cookie values.
pub fn cookie_map(raw: &str) -> HashMap<String, String> {
    parse_cookie_string(raw).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_pattern_wins_when_present() {
        let html = r#"<a href="?lname=ABC123,extra">x</a>"#;
        assert_eq!(extract_lname(html), Some("ABC123".to_string()));
    }

    #[test]
    fn comma_truncates_capture() {
        let html = r#"lname=ZED99,othertoken"#;
        assert_eq!(extract_lname(html), Some("ZED99".to_string()));
    }

    #[test]
    fn hidden_input_pattern_used_as_fallback() {
        let html = r#"<input type="hidden" name="lname" value="HIDDEN42">"#;
        assert_eq!(extract_lname(html), Some("HIDDEN42".to_string()));
    }

    #[test]
    fn earlier_pattern_in_list_wins_when_multiple_match() {
        let html = r#"lname=FIRST<input type="hidden" name="lname" value="SECOND">"#;
        assert_eq!(extract_lname(html), Some("FIRST".to_string()));
    }

    #[test]
    fn missing_lname_is_none() {
        assert_eq!(extract_lname("<html>nothing here</html>"), None);
    }

    #[test]
    fn empty_cookie_string_is_fatal() {
        assert!(validate_cookie_string("").is_err());
        assert!(validate_cookie_string("novalue;alsonovalue").is_err());
    }
}
