//! Request orchestration (C8): the two-phase per-request pipeline that turns a cookie string
//! and a set of week offsets into validated `TimetableData`, fanning out with
//! `FuturesUnordered` the same way the teacher's `tracker.rs` bounds its concurrent scrape.

use std::collections::HashMap;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::{AdapterError, AdapterResult};
use crate::limiter::{ConcurrencyLimiter, LimiterConfig};
use crate::model::{self, TimetableData, Warning};
use crate::scrape::{homework, week, WeekScrapeResult};
use crate::session::{self, Session};
use crate::teachers::{TeacherCache, TeacherMap};
use crate::transport::Transport;

const WEEK_PATH: &str = "/i/udvalg.asp";
const HOMEWORK_PATH: &str = "/i/note.asp";

/// `week_fetch`'s bounds (spec §4.8 step 3): initial 5, min 1, max 50, forced ceiling 10.
pub fn week_limiter_defaults() -> LimiterConfig {
    LimiterConfig::default()
}

/// `homework_fetch`'s bounds (spec §4.8 step 3): initial 20, min 1, max 100, forced ceiling 30.
/// A distinct ceiling from `week_fetch` because homework notes fan out far wider than weeks per
/// request (one call per lesson, not per offset).
pub fn homework_limiter_defaults() -> LimiterConfig {
    LimiterConfig {
        initial: 20.0,
        max: 100.0,
        ..LimiterConfig::default()
    }
}

pub const WEEK_FORCED_CEILING: f64 = 10.0;
pub const HOMEWORK_FORCED_CEILING: f64 = 30.0;

/// Per-request tuning, built from `ExtractionOptions` by the server layer.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub week_fetch_initial: f64,
    pub homework_fetch_initial: f64,
    /// `week_fetch`'s fixed ceiling when `force_max_concurrency` is set.
    pub week_forced_ceiling: f64,
    /// `homework_fetch`'s fixed ceiling when `force_max_concurrency` is set.
    pub homework_forced_ceiling: f64,
    /// When true, both fan-out stages pin to their respective forced ceiling for the whole
    /// request instead of adapting via the AIMD limiter.
    pub force_max_concurrency: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            week_fetch_initial: week_limiter_defaults().initial,
            homework_fetch_initial: homework_limiter_defaults().initial,
            week_forced_ceiling: WEEK_FORCED_CEILING,
            homework_forced_ceiling: HOMEWORK_FORCED_CEILING,
            force_max_concurrency: false,
        }
    }
}

fn build_limiter(base: LimiterConfig, initial: f64, force: bool, ceiling: f64) -> ConcurrencyLimiter {
    if force {
        ConcurrencyLimiter::forced(ceiling)
    } else {
        ConcurrencyLimiter::new(LimiterConfig { initial, ..base })
    }
}

/// Runs `items` through `make_fut`, admitting new futures only while fewer than
/// `limiter.limit()` are resident in the in-flight set (spec §4.8's "up to `limit()` calls in
/// flight at any time" / §5's backpressure requirement: "new task admissions block on the
/// limiter"). `limiter.limit()` is re-read before every admission, so an AIMD adjustment made
/// mid-fan-out (a `report_failure` from one in-flight call) immediately narrows how many more
/// of the remaining items are admitted, without needing a second pass.
async fn bounded_fan_out<T, O, F, Fut>(
    limiter: &ConcurrencyLimiter,
    items: impl IntoIterator<Item = T>,
    mut make_fut: F,
) -> Vec<O>
where
    F: FnMut(T) -> Fut,
    Fut: std::future::Future<Output = O>,
{
    let mut pending = items.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut results = Vec::new();

    loop {
        while in_flight.len() < limiter.limit() {
            match pending.next() {
                Some(item) => in_flight.push(make_fut(item)),
                None => break,
            }
        }

        match in_flight.next().await {
            Some(result) => results.push(result),
            None => break,
        }
    }

    results
}

/// Bootstraps a session and returns the set of week offsets advertised by a bootstrap fetch of
/// offset 0 (C7, driven off the same `udvalg.asp` week page the regular fan-out uses — its week
/// navigation anchors carry the `v=N` onclick handlers C7 scans for).
pub async fn available_offsets(
    transport: &Transport,
    cookies: &str,
    student_id: &str,
) -> AdapterResult<Vec<i32>> {
    let session = session::bootstrap(transport, cookies).await?;
    let response = fetch_week_html(transport, &session, student_id, 0, None).await?;
    Ok(crate::scrape::offsets::discover(&response.body))
}

/// One requested offset's outcome: either its validated `TimetableData`, or the specific
/// `AdapterError` that kept it from being produced (a week-fetch transport/auth failure, or a
/// validation failure). Kept distinct from `Warning` so callers can decide for themselves
/// whether a per-offset failure should be reported (batch) or propagated (single week).
struct OffsetOutcome {
    offset: i32,
    result: AdapterResult<TimetableData>,
}

/// The shared two-phase pipeline behind both `fetch_week` and `fetch_weeks`: bootstrap once,
/// prime the teacher cache, fan out week fetches bounded by `week_fetch`, fan out homework
/// fetches bounded by `homework_fetch`, merge, and validate. Returns one outcome per requested
/// offset (preserving its specific error, if any) plus the non-fatal homework-drop warnings
/// collected along the way. Homework fetch failures never fail their parent offset — the lesson
/// simply keeps a null `description` — since a homework note is best-effort by spec (§4.6/§4.8).
async fn fetch_offsets(
    transport: &Transport,
    teacher_cache: &TeacherCache,
    cookies: &str,
    student_id: &str,
    requested_offsets: &[i32],
    opts: &FetchOptions,
) -> AdapterResult<(Vec<OffsetOutcome>, Vec<Warning>)> {
    let session = session::bootstrap(transport, cookies).await?;
    let teacher_map = teacher_cache.get(transport, &session).await;

    let week_limiter = build_limiter(
        week_limiter_defaults(),
        opts.week_fetch_initial,
        opts.force_max_concurrency,
        opts.week_forced_ceiling,
    );
    let homework_limiter = build_limiter(
        homework_limiter_defaults(),
        opts.homework_fetch_initial,
        opts.force_max_concurrency,
        opts.homework_forced_ceiling,
    );

    let mut warnings = Vec::new();

    let week_results = bounded_fan_out(&week_limiter, requested_offsets.iter().copied(), |offset| {
        fetch_one_week(transport, &session, &teacher_map, student_id, offset, &week_limiter)
    })
    .await;

    let mut scraped: Vec<(i32, WeekScrapeResult)> = Vec::new();
    let mut failed_offsets: Vec<(i32, AdapterError)> = Vec::new();
    for outcome in week_results {
        match outcome {
            Ok(pair) => scraped.push(pair),
            Err((offset, e)) => failed_offsets.push((offset, e)),
        }
    }

    let homework_items: Vec<(String, usize, i32)> = scraped
        .iter()
        .enumerate()
        .flat_map(|(idx, (offset, result))| {
            result
                .homework_lesson_ids
                .iter()
                .map(move |id| (id.clone(), idx, *offset))
        })
        .collect();

    let homework_results = bounded_fan_out(
        &homework_limiter,
        homework_items,
        |(lesson_id, idx, offset)| {
            fetch_one_homework(transport, &session, lesson_id, idx, offset, &homework_limiter)
        },
    )
    .await;

    let mut homework_by_week: HashMap<usize, HashMap<String, String>> = HashMap::new();
    for outcome in homework_results {
        match outcome {
            Ok((idx, lesson_id, markdown)) => {
                if !markdown.is_empty() {
                    homework_by_week.entry(idx).or_default().insert(lesson_id, markdown);
                }
            }
            Err((offset, lesson_id, e)) => warnings.push(Warning {
                offset,
                reason: format!("homework for lesson {lesson_id} dropped: {e}"),
            }),
        }
    }

    let mut outcomes: Vec<OffsetOutcome> = Vec::new();
    for (idx, (offset, result)) in scraped.into_iter().enumerate() {
        let mut lessons = result.lessons;
        if let Some(map) = homework_by_week.get(&idx) {
            for lesson in lessons.iter_mut() {
                if let Some(id) = &lesson.lesson_id {
                    if let Some(markdown) = map.get(id) {
                        lesson.description = Some(markdown.clone());
                    }
                }
            }
        }

        let data = TimetableData::new(result.student_info, result.week_info, lessons);
        let result = model::validate(&data).map(|()| data);
        outcomes.push(OffsetOutcome { offset, result });
    }
    for (offset, e) in failed_offsets {
        outcomes.push(OffsetOutcome {
            offset,
            result: Err(e),
        });
    }

    Ok((outcomes, warnings))
}

/// Fetches and validates a single week. Unlike the batch operations, the offset's own error is
/// propagated directly rather than collapsed into a warning (spec §7: "Single-week endpoint
/// surfaces its offset's error directly") — a network timeout surfaces as `NetworkError`
/// (504), a mid-request session loss as `AuthError` (401), and only an actually-unparseable or
/// invalid payload surfaces as `ValidationError` (404).
pub async fn fetch_week(
    transport: &Transport,
    teacher_cache: &TeacherCache,
    cookies: &str,
    student_id: &str,
    offset: i32,
    opts: &FetchOptions,
) -> AdapterResult<TimetableData> {
    let (outcomes, _warnings) =
        fetch_offsets(transport, teacher_cache, cookies, student_id, &[offset], opts).await?;
    outcomes
        .into_iter()
        .next()
        .map(|outcome| outcome.result)
        .unwrap_or_else(|| {
            Err(AdapterError::ValidationError(
                "no parseable timetable for the requested offset".to_string(),
            ))
        })
}

/// Fetches and validates a batch of weeks concurrently. Offsets that fail at the transport or
/// validation stage are dropped and recorded as a structured warning rather than failing the
/// whole batch; the request only fails outright if session bootstrap itself fails.
pub async fn fetch_weeks(
    transport: &Transport,
    teacher_cache: &TeacherCache,
    cookies: &str,
    student_id: &str,
    requested_offsets: &[i32],
    opts: &FetchOptions,
) -> AdapterResult<(Vec<TimetableData>, Vec<Warning>)> {
    let (outcomes, mut warnings) =
        fetch_offsets(transport, teacher_cache, cookies, student_id, requested_offsets, opts)
            .await?;

    let mut out = Vec::new();
    for OffsetOutcome { offset, result } in outcomes {
        match result {
            Ok(data) => out.push(data),
            Err(e) => warnings.push(Warning {
                offset,
                reason: e.to_string(),
            }),
        }
    }

    out.sort_by_key(|d| d.week_info.week_number.unwrap_or(u32::MAX));

    Ok((out, warnings))
}

/// POSTs `/i/udvalg.asp` for one week offset (spec §4.8 step 4a / §6.2). A 3xx-shaped response
/// here is surfaced by the transport as a non-retryable `UpstreamStatusError`, which this
/// reclassifies as session loss mid-request.
async fn fetch_week_html(
    transport: &Transport,
    session: &Session,
    student_id: &str,
    offset: i32,
    limiter: Option<&ConcurrencyLimiter>,
) -> AdapterResult<crate::transport::UpstreamResponse> {
    let timex = session.fresh_timer();
    let offset_str = offset.to_string();
    let response = transport
        .post_form(
            WEEK_PATH,
            &session.cookie_header,
            &[
                ("fname", "Henry"),
                ("q", "stude"),
                ("v", offset_str.as_str()),
                ("lname", &session.lname),
                ("timex", &timex),
                ("id", student_id),
            ],
            limiter,
        )
        .await;

    match response {
        Err(AdapterError::UpstreamStatusError { status, .. }) if (300..400).contains(&status) => {
            Err(AdapterError::AuthError(
                "upstream redirected a week fetch mid-request; session lost".to_string(),
            ))
        }
        other => other,
    }
}

async fn fetch_one_week(
    transport: &Transport,
    session: &Session,
    teacher_map: &TeacherMap,
    student_id: &str,
    offset: i32,
    limiter: &ConcurrencyLimiter,
) -> Result<(i32, WeekScrapeResult), (i32, AdapterError)> {
    let response = fetch_week_html(transport, session, student_id, offset, Some(limiter))
        .await
        .map_err(|e| (offset, e))?;
    Ok((offset, week::scrape(&response.body, teacher_map)))
}

async fn fetch_one_homework(
    transport: &Transport,
    session: &Session,
    lesson_id: String,
    week_idx: usize,
    offset: i32,
    limiter: &ConcurrencyLimiter,
) -> Result<(usize, String, String), (i32, String, AdapterError)> {
    let timer = session.fresh_timer();
    let response = transport
        .post_form(
            HOMEWORK_PATH,
            &session.cookie_header,
            &[
                ("fname", "Henry"),
                ("q", &lesson_id),
                ("MyFunktion", "ReadNotesToLessonWithLessonRID"),
                ("lname", &session.lname),
                ("timer", &timer),
            ],
            Some(limiter),
        )
        .await
        .map_err(|e| (offset, lesson_id.clone(), e))?;

    match homework::parse(&response.body) {
        Some((parsed_id, markdown)) => Ok((week_idx, parsed_id, markdown)),
        None => Ok((week_idx, lesson_id, String::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_concurrency_overrides_initial() {
        let limiter = build_limiter(week_limiter_defaults(), 5.0, true, 2.0);
        assert_eq!(limiter.limit(), 2);
        limiter.report_failure();
        assert_eq!(limiter.limit(), 2);
    }

    #[test]
    fn unforced_concurrency_uses_initial() {
        let limiter = build_limiter(week_limiter_defaults(), 7.0, false, 50.0);
        assert_eq!(limiter.limit(), 7);
    }

    #[test]
    fn homework_defaults_differ_from_week_defaults() {
        let week = week_limiter_defaults();
        let homework = homework_limiter_defaults();
        assert_eq!(week.initial, 5.0);
        assert_eq!(week.max, 50.0);
        assert_eq!(homework.initial, 20.0);
        assert_eq!(homework.max, 100.0);
    }

    const BOOTSTRAP_HTML: &str = r#"<html><body>lname=SESSLNAME,ignored</body></html>"#;

    const WEEK0_HTML: &str = r#"
        <html><body>
        <a class="UgeKnapValgt">Vika 13</a>
        <p>24.03.2025 - 30.03.2025</p>
        <table class="time_8_16">
            <tr><td class="lektionslinje_1_aktuel">Mánadagur 24/3</td></tr>
            <tr>
                <td class="spacer" colspan="1"></td>
                <td class="lektionslinje_lesson0">
                    <a>søg-A-123-2425-x</a>
                    <a>BIJ</a>
                    <a>st. 608</a>
                    <span id="MyWindow12345Main"></span>
                    <input type="image" src="/x/note.gif">
                </td>
            </tr>
        </table>
        </body></html>
    "#;

    const WEEK1_HTML_NO_TABLE: &str = r#"<html><body>no timetable table here</body></html>"#;

    const HOMEWORK_HTML: &str = r#"
        <input type="hidden" id="LektionsID12345" value="12345">
        <p><b>Heimaarbeiði</b><br>Read <b>ch. 3</b></p>
    "#;

    fn test_fetch_opts() -> FetchOptions {
        FetchOptions {
            force_max_concurrency: true,
            ..FetchOptions::default()
        }
    }

    #[tokio::test]
    async fn end_to_end_single_week_merges_homework() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/132n/")
            .with_status(200)
            .with_body(BOOTSTRAP_HTML)
            .create_async()
            .await;
        server
            .mock("POST", "/i/udvalg.asp")
            .match_body(mockito::Matcher::UrlEncoded("v".into(), "0".into()))
            .with_status(200)
            .with_body(WEEK0_HTML)
            .create_async()
            .await;
        server
            .mock("POST", "/i/note.asp")
            .match_body(mockito::Matcher::UrlEncoded("q".into(), "12345".into()))
            .with_status(200)
            .with_body(HOMEWORK_HTML)
            .create_async()
            .await;

        let transport = Transport::new(server.url(), 5, 3, 0.01).unwrap();
        let teacher_cache = TeacherCache::new(3600);
        let opts = test_fetch_opts();

        let data = fetch_week(&transport, &teacher_cache, "a=1", "stu-1", 0, &opts)
            .await
            .unwrap();

        assert_eq!(data.events.len(), 1);
        let lesson = &data.events[0];
        assert!(lesson.has_homework_note);
        assert_eq!(lesson.description.as_deref(), Some("Read **ch. 3**"));
        assert_eq!(data.week_info.week_number, Some(13));
    }

    #[tokio::test]
    async fn batch_treats_table_less_offset_as_a_valid_empty_week() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/132n/")
            .with_status(200)
            .with_body(BOOTSTRAP_HTML)
            .create_async()
            .await;
        server
            .mock("POST", "/i/udvalg.asp")
            .match_body(mockito::Matcher::UrlEncoded("v".into(), "0".into()))
            .with_status(200)
            .with_body(WEEK0_HTML)
            .create_async()
            .await;
        server
            .mock("POST", "/i/udvalg.asp")
            .match_body(mockito::Matcher::UrlEncoded("v".into(), "1".into()))
            .with_status(200)
            .with_body(WEEK1_HTML_NO_TABLE)
            .create_async()
            .await;
        server
            .mock("POST", "/i/note.asp")
            .match_body(mockito::Matcher::UrlEncoded("q".into(), "12345".into()))
            .with_status(200)
            .with_body(HOMEWORK_HTML)
            .create_async()
            .await;

        let transport = Transport::new(server.url(), 5, 3, 0.01).unwrap();
        let teacher_cache = TeacherCache::new(3600);
        let opts = test_fetch_opts();

        let (weeks, warnings) =
            fetch_weeks(&transport, &teacher_cache, "a=1", "stu-1", &[0, 1], &opts)
                .await
                .unwrap();

        // Offset 1's table-less response yields an empty-but-valid week (spec scenario 1), not
        // a warning: only a fetch/validation failure produces a dropped offset.
        assert_eq!(weeks.len(), 2);
        assert!(warnings.is_empty());
        assert_eq!(weeks[0].week_info.week_number, None);
        assert_eq!(weeks[1].week_info.week_number, Some(13));
    }

    #[tokio::test]
    async fn batch_drops_an_offset_that_fails_at_the_transport_and_keeps_the_rest() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/132n/")
            .with_status(200)
            .with_body(BOOTSTRAP_HTML)
            .create_async()
            .await;
        server
            .mock("POST", "/i/udvalg.asp")
            .match_body(mockito::Matcher::UrlEncoded("v".into(), "0".into()))
            .with_status(200)
            .with_body(WEEK0_HTML)
            .create_async()
            .await;
        server
            .mock("POST", "/i/udvalg.asp")
            .match_body(mockito::Matcher::UrlEncoded("v".into(), "1".into()))
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("POST", "/i/note.asp")
            .match_body(mockito::Matcher::UrlEncoded("q".into(), "12345".into()))
            .with_status(200)
            .with_body(HOMEWORK_HTML)
            .create_async()
            .await;

        let transport = Transport::new(server.url(), 5, 3, 0.01).unwrap();
        let teacher_cache = TeacherCache::new(3600);
        let opts = test_fetch_opts();

        let (weeks, warnings) =
            fetch_weeks(&transport, &teacher_cache, "a=1", "stu-1", &[0, 1], &opts)
                .await
                .unwrap();

        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].week_info.week_number, Some(13));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].offset, 1);
    }

    #[tokio::test]
    async fn single_week_propagates_network_error_instead_of_validation_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/132n/")
            .with_status(200)
            .with_body(BOOTSTRAP_HTML)
            .create_async()
            .await;
        server
            .mock("POST", "/i/udvalg.asp")
            .with_status(500)
            .create_async()
            .await;

        let transport = Transport::new(server.url(), 5, 1, 0.01).unwrap();
        let teacher_cache = TeacherCache::new(3600);
        let opts = test_fetch_opts();

        let err = fetch_week(&transport, &teacher_cache, "a=1", "stu-1", 0, &opts)
            .await
            .unwrap_err();

        assert!(
            matches!(err, AdapterError::NetworkError(_)),
            "expected NetworkError, got {err:?}"
        );
    }

    #[tokio::test]
    async fn single_week_propagates_auth_error_on_mid_request_redirect() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/132n/")
            .with_status(200)
            .with_body(BOOTSTRAP_HTML)
            .create_async()
            .await;
        server
            .mock("POST", "/i/udvalg.asp")
            .with_status(302)
            .with_header("location", "/login")
            .create_async()
            .await;

        let transport = Transport::new(server.url(), 5, 3, 0.01).unwrap();
        let teacher_cache = TeacherCache::new(3600);
        let opts = test_fetch_opts();

        let err = fetch_week(&transport, &teacher_cache, "a=1", "stu-1", 0, &opts)
            .await
            .unwrap_err();

        assert!(
            matches!(err, AdapterError::AuthError(_)),
            "expected AuthError, got {err:?}"
        );
    }

    #[tokio::test]
    async fn bounded_fan_out_never_exceeds_the_limiter_ceiling() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let limiter = ConcurrencyLimiter::forced(2.0);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let items: Vec<u32> = (0..10).collect();
        let results = bounded_fan_out(&limiter, items, |item| {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                item
            }
        })
        .await;

        assert_eq!(results.len(), 10);
        assert!(
            max_seen.load(Ordering::SeqCst) <= 2,
            "observed {} in flight, limiter ceiling was 2",
            max_seen.load(Ordering::SeqCst)
        );
    }
}
