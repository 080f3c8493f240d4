//! Pooled HTTP transport (C1): keep-alive client with retries, backoff, and concurrency-manager
//! hooks.
//!
//! Cookies are per-session, not per-process, so rather than use `reqwest`'s built-in cookie jar
//! (which is baked into a `Client` at build time and would have to be shared across sessions),
//! every outbound call forwards an explicit `Cookie` header built once at session bootstrap —
//! the same pattern the teacher's `webreg_wrapper.rs` uses (`header(COOKIE, self.cookies)`).
//! This keeps one process-wide connection pool shared by every session's concurrent calls.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::error::{AdapterError, AdapterResult};
use crate::limiter::ConcurrencyLimiter;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36";
const ACCEPT_HEADER: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const RETRYABLE_STATUSES: [u16; 3] = [429, 500, 503];

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: String,
    pub final_url: String,
}

pub struct Transport {
    /// Follows redirects; used for every call except the outermost bootstrap GET.
    client: Client,
    /// Never follows redirects; used so a login-page bounce is visible as a non-200 status.
    no_redirect_client: Client,
    base_url: String,
    max_retries: u32,
    backoff_factor_sec: f64,
}

impl Transport {
    pub fn new(base_url: impl Into<String>, request_timeout_sec: u64, max_retries: u32, backoff_factor_sec: f64) -> AdapterResult<Self> {
        let timeout = Duration::from_secs(request_timeout_sec);
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(20)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AdapterError::InternalError(format!("failed to build http client: {e}")))?;
        let no_redirect_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(20)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AdapterError::InternalError(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            no_redirect_client,
            base_url: base_url.into(),
            max_retries: max_retries.max(1),
            backoff_factor_sec,
        })
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    /// `GET path`. When `follow_redirects` is false, a redirect response is returned as-is
    /// (not followed) so the caller can classify it as an authentication loss.
    pub async fn get(
        &self,
        path: &str,
        cookies: &str,
        follow_redirects: bool,
        limiter: Option<&ConcurrencyLimiter>,
    ) -> AdapterResult<UpstreamResponse> {
        let client = if follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };
        let url = self.resolve(path);
        self.execute(
            limiter,
            move || {
                client
                    .get(&url)
                    .header(reqwest::header::COOKIE, cookies)
                    .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            },
        )
        .await
    }

    /// `POST path` with an `application/x-www-form-urlencoded` body. Like the bootstrap GET,
    /// redirects are never followed: a session lost mid-request bounces these upstream
    /// endpoints to a login page, and that has to surface as a 3xx status (spec §4.8 step 4a)
    /// rather than be silently followed into whatever the login page itself returns.
    pub async fn post_form(
        &self,
        path: &str,
        cookies: &str,
        form: &[(&str, &str)],
        limiter: Option<&ConcurrencyLimiter>,
    ) -> AdapterResult<UpstreamResponse> {
        let url = self.resolve(path);
        let client = &self.no_redirect_client;
        self.execute(
            limiter,
            move || {
                client
                    .post(&url)
                    .header(reqwest::header::COOKIE, cookies)
                    .form(form)
            },
        )
        .await
    }

    async fn execute<F>(
        &self,
        limiter: Option<&ConcurrencyLimiter>,
        build_request: F,
    ) -> AdapterResult<UpstreamResponse>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err: Option<String> = None;

        for attempt in 1..=self.max_retries {
            let result = build_request().send().await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        if let Some(l) = limiter {
                            l.report_success();
                        }
                        let body = resp.text().await.unwrap_or_default();
                        return Ok(UpstreamResponse {
                            status,
                            body,
                            final_url,
                        });
                    }

                    if RETRYABLE_STATUSES.contains(&status.as_u16()) {
                        if let Some(l) = limiter {
                            l.report_failure();
                        }
                        last_err = Some(format!("status {status}"));
                        if attempt < self.max_retries {
                            self.sleep_backoff(attempt).await;
                            continue;
                        }
                        return Err(AdapterError::NetworkError(format!(
                            "retries exhausted after {attempt} attempts, last status {status}"
                        )));
                    }

                    // Non-retryable HTTP failure (including non-followed redirects): fail
                    // immediately without retrying.
                    let body = resp.text().await.unwrap_or_default();
                    let snippet: String = body.chars().take(200).collect();
                    return Err(AdapterError::UpstreamStatusError {
                        status: status.as_u16(),
                        body_snippet: snippet,
                    });
                }
                Err(e) => {
                    if let Some(l) = limiter {
                        l.report_failure();
                    }
                    last_err = Some(e.to_string());
                    if attempt < self.max_retries {
                        self.sleep_backoff(attempt).await;
                        continue;
                    }
                }
            }
        }

        Err(AdapterError::NetworkError(
            last_err.unwrap_or_else(|| "unknown transport failure".to_string()),
        ))
    }

    async fn sleep_backoff(&self, attempt: u32) {
        let secs = self.backoff_factor_sec * 2f64.powi(attempt as i32 - 1);
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
}

/// Parses a semicolon-separated `name=value; name2=value2` cookie string into a forwardable
/// header value and a map, dropping pairs without `=` and trimming surrounding whitespace.
///
/// Parsing the same string twice yields identical results (idempotence).
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parsing_drops_pairs_without_equals() {
        let parsed = parse_cookie_string(" a=1; noequals; b = 2 ;c=3");
        assert_eq!(
            parsed,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn cookie_parsing_is_idempotent() {
        let s = "x=1; y=2";
        assert_eq!(parse_cookie_string(s), parse_cookie_string(s));
    }

    #[test]
    fn empty_cookie_string_parses_to_empty() {
        assert!(parse_cookie_string("").is_empty());
        assert!(parse_cookie_string("   ").is_empty());
    }

    proptest::proptest! {
        #[test]
        fn cookie_parsing_never_panics_on_arbitrary_input(s in "\\PC*") {
            let _ = parse_cookie_string(&s);
        }

        #[test]
        fn cookie_parsing_round_trips_simple_pairs(
            name in "[a-zA-Z0-9_]{1,10}",
            value in "[a-zA-Z0-9_]{1,10}",
        ) {
            let raw = format!("{name}={value}");
            let parsed = parse_cookie_string(&raw);
            prop_assert_eq!(parsed, vec![(name, value)]);
        }
    }

    #[tokio::test]
    async fn retries_on_retryable_status_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let retry_mock = server
            .mock("GET", "/132n/")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let ok_mock = server
            .mock("GET", "/132n/")
            .with_status(200)
            .with_body("ok")
            .expect(1)
            .create_async()
            .await;

        let transport = Transport::new(server.url(), 5, 3, 0.01).unwrap();
        let response = transport.get("/132n/", "a=1", true, None).await.unwrap();

        assert_eq!(response.body, "ok");
        retry_mock.assert_async().await;
        ok_mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_retryable_status_fails_immediately() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/132n/")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let transport = Transport::new(server.url(), 5, 3, 0.01).unwrap();
        let err = transport.get("/132n/", "a=1", true, None).await.unwrap_err();

        assert!(matches!(err, AdapterError::UpstreamStatusError { status: 404, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_exhaust_into_network_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/132n/")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let transport = Transport::new(server.url(), 5, 2, 0.01).unwrap();
        let err = transport.get("/132n/", "a=1", true, None).await.unwrap_err();

        assert!(matches!(err, AdapterError::NetworkError(_)));
        mock.assert_async().await;
    }
}
