//! Week HTML scraper (C5): parses one week's timetable HTML into a structured week, the
//! student info, the ordered list of lessons, and the list of lesson ids carrying a homework
//! note.

use std::collections::HashSet;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::model::{Lesson, StudentInfo, WeekInfo};
use crate::teachers::{self, TeacherMap};

const STUDENT_MARKER: &str = "Næmingatímatalva";

const CANCELLATION_CLASSES: &[&str] = &[
    "lektionslinje_lesson1",
    "lektionslinje_lesson2",
    "lektionslinje_lesson3",
    "lektionslinje_lesson4",
    "lektionslinje_lesson5",
    "lektionslinje_lesson7",
    "lektionslinje_lesson10",
    "lektionslinje_lessoncancelled",
];

const DAY_MAP: &[(&str, &str)] = &[
    ("Mánadagur", "Monday"),
    ("Týsdagur", "Tuesday"),
    ("Mikudagur", "Wednesday"),
    ("Hósdagur", "Thursday"),
    ("Fríggjadagur", "Friday"),
    ("Leygardagur", "Saturday"),
    ("Sunnudagur", "Sunday"),
];

static TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("table.time_8_16").unwrap());
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static SPAN_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("span[id]").unwrap());
static IMG_INPUT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[type="image"]"#).unwrap());
static WEEK_NAV_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.UgeKnapValgt").unwrap());

static LESSON_CLASS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^lektionslinje_lesson\d+$").unwrap());
static DAY_HEADER_PATTERN: Lazy<Regex> = Lazy::new(|| build_day_header_pattern());
static WEEK_NUMBER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"Vika\s+(\d+)").unwrap());
static DATE_RANGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2})\.(\d{2})\.(\d{4})\s*-\s*(\d{2})\.(\d{2})\.(\d{4})").unwrap()
});

fn build_day_header_pattern() -> Regex {
    let names: Vec<&str> = DAY_MAP.iter().map(|(fo, _)| *fo).collect();
    Regex::new(&format!(r"^({})\s+(\d{{1,2}}/\d{{1,2}})$", names.join("|"))).unwrap()
}

pub struct WeekScrapeResult {
    pub week_info: WeekInfo,
    pub student_info: StudentInfo,
    pub lessons: Vec<Lesson>,
    pub homework_lesson_ids: Vec<String>,
}

pub fn scrape(html: &str, teacher_map: &TeacherMap) -> WeekScrapeResult {
    let document = Html::parse_document(html);

    let Some(table) = document.select(&TABLE_SELECTOR).next() else {
        return WeekScrapeResult {
            week_info: WeekInfo::empty(),
            student_info: StudentInfo {
                student_name: String::new(),
                class: String::new(),
            },
            lessons: vec![],
            homework_lesson_ids: vec![],
        };
    };

    let student_info = parse_student_info(&document);
    let week_info = parse_week_info(&document);

    let year = week_info.year.unwrap_or_else(|| chrono::Local::now().format("%Y").to_string().parse().unwrap());

    let mut lessons = Vec::new();
    let mut homework_ids = Vec::new();
    let mut current_day: Option<(&str, String)> = None;

    for row in table.select(&ROW_SELECTOR) {
        let cells: Vec<ElementRef> = row.select(&CELL_SELECTOR).collect();
        if cells.is_empty() {
            continue;
        }

        let first_cell = cells[0];
        let first_text = first_cell.text().collect::<String>().trim().to_string();
        let first_classes: HashSet<&str> = first_cell.value().classes().collect();
        let is_header_marker =
            first_classes.contains("lektionslinje_1") || first_classes.contains("lektionslinje_1_aktuel");

        if is_header_marker {
            if let Some(caps) = DAY_HEADER_PATTERN.captures(&first_text) {
                let day_name = DAY_MAP
                    .iter()
                    .find(|(fo, _)| *fo == &caps[1])
                    .map(|(fo, _)| *fo)
                    .unwrap();
                current_day = Some((day_name, caps[2].to_string()));
            }
        }

        let mut col: u32 = 1;
        for (idx, cell) in cells.iter().enumerate() {
            let colspan = cell
                .value()
                .attr("colspan")
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(1);
            let start_col = col;
            col += colspan;

            if idx == 0 {
                continue;
            }

            let classes: Vec<&str> = cell.value().classes().collect();
            let is_lesson = classes.iter().any(|c| LESSON_CLASS_PATTERN.is_match(c));
            if !is_lesson {
                continue;
            }

            let Some((day_name, date_part)) = &current_day else {
                continue;
            };

            let cancelled = classes
                .iter()
                .any(|c| CANCELLATION_CLASSES.contains(c));

            if let Some(lesson) = parse_lesson_cell(
                *cell,
                start_col,
                colspan,
                day_name,
                date_part,
                year,
                cancelled,
                teacher_map,
            ) {
                if lesson.has_homework_note {
                    if let Some(id) = &lesson.lesson_id {
                        homework_ids.push(id.clone());
                    }
                }
                lessons.push(lesson);
            }
        }
    }

    if lessons.is_empty() {
        let fallback = fallback_scan(&student_info_raw_text(&document), teacher_map, year);
        if !fallback.is_empty() {
            lessons = fallback;
        }
    }

    WeekScrapeResult {
        week_info,
        student_info,
        lessons,
        homework_lesson_ids: homework_ids,
    }
}

fn parse_lesson_cell(
    cell: ElementRef,
    start_col: u32,
    colspan: u32,
    day_name_fo: &str,
    date_part: &str,
    year: i32,
    cancelled: bool,
    teacher_map: &TeacherMap,
) -> Option<Lesson> {
    let anchors: Vec<ElementRef> = cell.select(&ANCHOR_SELECTOR).collect();
    if anchors.len() < 3 {
        tracing::warn!("lesson cell has fewer than 3 anchors; skipping");
        return None;
    }

    let subject_code_raw = anchors[0].text().collect::<String>().trim().to_string();
    let teacher_short = anchors[1].text().collect::<String>().trim().to_string();
    let room_raw = anchors[2].text().collect::<String>().trim().to_string();

    let (subject, level, year_code) = parse_subject_code(&subject_code_raw);
    let location = normalize_room(&room_raw);
    let teacher = teachers::resolve(teacher_map, &teacher_short);
    let academic_year = format_academic_year(&year_code);

    let date = date_part_to_iso(date_part, year);
    let day_of_week = DAY_MAP
        .iter()
        .find(|(fo, _)| *fo == day_name_fo)
        .map(|(_, en)| en.to_string())
        .unwrap_or_default();

    let (time_slot, start_time, end_time, time_range) = time_slot_for(start_col, colspan);

    let lesson_id = cell.select(&SPAN_SELECTOR).find_map(|span| {
        let id = span.value().attr("id")?;
        if id.starts_with("MyWindow") && id.ends_with("Main") {
            Some(
                id.trim_start_matches("MyWindow")
                    .trim_end_matches("Main")
                    .to_string(),
            )
        } else {
            None
        }
    });

    let has_homework_note = cell.select(&IMG_INPUT_SELECTOR).any(|input| {
        input
            .value()
            .attr("src")
            .map(|s| s.contains("note.gif"))
            .unwrap_or(false)
    });

    Some(Lesson {
        title: subject,
        level,
        year: academic_year,
        date,
        day_of_week,
        teacher,
        teacher_short,
        location,
        time_slot,
        start_time,
        end_time,
        time_range,
        cancelled,
        lesson_id,
        description: None,
        has_homework_note,
    })
}

fn parse_subject_code(raw: &str) -> (String, String, String) {
    let parts: Vec<&str> = raw.split('-').collect();
    if parts.first() == Some(&"Várroynd") && parts.len() >= 5 {
        (
            format!("{}-{}", parts[0], parts[1]),
            parts[2].to_string(),
            parts[4].to_string(),
        )
    } else if parts.len() >= 4 {
        (parts[0].to_string(), parts[1].to_string(), parts[3].to_string())
    } else {
        (raw.to_string(), String::new(), String::new())
    }
}

fn normalize_room(raw: &str) -> String {
    raw.strip_prefix("st.")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// `YYZZ` -> `20YY-20ZZ` iff `ZZ == YY+1`; otherwise the raw code is preserved.
pub fn format_academic_year(code: &str) -> String {
    if code.len() == 4 && code.chars().all(|c| c.is_ascii_digit()) {
        let yy: u32 = code[0..2].parse().unwrap();
        let zz: u32 = code[2..4].parse().unwrap();
        if zz == (yy + 1) % 100 {
            return format!("20{:02}-20{:02}", yy, zz);
        }
    }
    code.to_string()
}

/// The fixed time-slot lookup table (spec §4.5 step 8).
fn time_slot_for(start_col: u32, colspan: u32) -> (String, Option<String>, Option<String>, String) {
    if colspan >= 90 {
        return (
            "All day".to_string(),
            Some("08:10".to_string()),
            Some("15:25".to_string()),
            "All day, 08:10-15:25".to_string(),
        );
    }

    let (slot, start, end) = match start_col {
        2..=25 => ("1", "08:10", "09:40"),
        26..=50 => ("2", "10:05", "11:35"),
        51..=71 => ("3", "12:10", "13:40"),
        72..=90 => ("4", "13:55", "15:25"),
        91..=111 => ("5", "15:30", "17:00"),
        112..=131 => ("6", "17:15", "18:45"),
        _ => return ("N/A".to_string(), None, None, "N/A".to_string()),
    };

    (
        slot.to_string(),
        Some(start.to_string()),
        Some(end.to_string()),
        format!("{start}-{end}"),
    )
}

/// Converts a `DD/MM` fragment plus a resolved year into an ISO date string.
fn date_part_to_iso(date_part: &str, year: i32) -> String {
    let Some((d, m)) = date_part.split_once('/') else {
        return String::new();
    };
    let (Ok(day), Ok(month)) = (d.parse::<u32>(), m.parse::<u32>()) else {
        return String::new();
    };
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn parse_student_info(document: &Html) -> StudentInfo {
    let cell_selector = Selector::parse("td").unwrap();
    let inner_table_selector = Selector::parse("table").unwrap();

    for cell in document.select(&cell_selector) {
        let full_text: String = cell.text().collect();
        if !full_text.contains(STUDENT_MARKER) {
            continue;
        }

        let prefix_text = match cell.select(&inner_table_selector).next() {
            Some(_) => {
                // Take only the text of direct text-node children preceding the nested table.
                let mut out = String::new();
                for child in cell.children() {
                    if let Some(el) = ElementRef::wrap(child) {
                        if el.value().name() == "table" {
                            break;
                        }
                    }
                    out.push_str(&node_text(child));
                }
                out
            }
            None => full_text.clone(),
        };

        if let Some(info) = parse_student_info_text(&prefix_text) {
            return info;
        }
    }

    StudentInfo {
        student_name: String::new(),
        class: String::new(),
    }
}

fn node_text(node: ego_tree::NodeRef<scraper::Node>) -> String {
    match node.value() {
        scraper::Node::Text(t) => t.to_string(),
        scraper::Node::Element(_) => node.children().map(node_text).collect(),
        _ => String::new(),
    }
}

fn parse_student_info_text(text: &str) -> Option<StudentInfo> {
    static MARKER_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(&format!(r"{}:\s*([^,]+),\s*(.+)", regex::escape(STUDENT_MARKER))).unwrap()
    });

    if let Some(caps) = MARKER_PATTERN.captures(text) {
        return Some(StudentInfo {
            student_name: caps[1].trim().to_string(),
            class: caps[2].trim().to_string(),
        });
    }

    let after_marker = text.split(STUDENT_MARKER).nth(1)?;
    let after_colon = after_marker.splitn(2, ':').nth(1)?;
    let mut parts = after_colon.splitn(2, ',');
    let name = parts.next()?.trim().to_string();
    let class = parts.next().unwrap_or("").trim().to_string();
    Some(StudentInfo {
        student_name: name,
        class,
    })
}

fn student_info_raw_text(document: &Html) -> String {
    document.root_element().text().collect::<String>()
}

fn parse_week_info(document: &Html) -> WeekInfo {
    let week_number: Option<u32> = document
        .select(&WEEK_NAV_SELECTOR)
        .next()
        .and_then(|a| {
            WEEK_NUMBER_PATTERN
                .captures(&a.text().collect::<String>())
                .and_then(|c| c[1].parse::<u32>().ok())
        });

    let full_text: String = document.root_element().text().collect();
    let date_range = DATE_RANGE_PATTERN.captures(&full_text);

    let (start_date, end_date, year) = match date_range {
        Some(caps) => {
            let start = format!("{}-{}-{}", &caps[3], &caps[2], &caps[1]);
            let end = format!("{}-{}-{}", &caps[6], &caps[5], &caps[4]);
            let year: i32 = caps[3].parse().unwrap_or_else(|_| chrono::Local::now().format("%Y").to_string().parse().unwrap());
            (Some(start), Some(end), Some(year))
        }
        None => (None, None, None),
    };

    match (week_number, &start_date, &end_date, year) {
        (Some(wn), Some(s), Some(e), Some(y)) => WeekInfo::new(wn, s.clone(), e.clone(), y),
        _ => WeekInfo {
            week_number,
            start_date,
            end_date,
            year,
            week_key: None,
        },
    }
}

/// Best-effort fallback for a known degraded HTML layout: when the primary table walk finds
/// zero lessons, scan the student-info block's raw text for inline `<day> DD/MM` markers and
/// `subject-level-team-year TEACH st. ROOM` substrings. Not a contract — see spec §4.5 step 12.
fn fallback_scan(text: &str, teacher_map: &TeacherMap, year: i32) -> Vec<Lesson> {
    static DAY_SPAN: Lazy<Regex> = Lazy::new(|| build_day_header_pattern());
    static EVENT_SUBSTRING: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"([\p{L}]+)-([\p{L}0-9]+)-(\d+)-(\d{4})\s+([A-ZÁÐÍÓÚÝÆØ]{2,4})\s+st\.\s*(\S+)")
            .unwrap()
    });

    let mut current: Option<(&str, String)> = None;
    let mut lessons = Vec::new();

    for line in text.lines() {
        if let Some(caps) = DAY_SPAN.captures(line.trim()) {
            let day_name = DAY_MAP
                .iter()
                .find(|(fo, _)| *fo == &caps[1])
                .map(|(fo, _)| *fo)
                .unwrap();
            current = Some((day_name, caps[2].to_string()));
        }

        let Some((day_name, date_part)) = &current else {
            continue;
        };

        for caps in EVENT_SUBSTRING.captures_iter(line) {
            let teacher_short = caps[5].to_string();
            let lesson = Lesson {
                title: caps[1].to_string(),
                level: caps[2].to_string(),
                year: format_academic_year(&caps[4]),
                date: date_part_to_iso(date_part, year),
                day_of_week: DAY_MAP
                    .iter()
                    .find(|(fo, _)| *fo == day_name)
                    .map(|(_, en)| en.to_string())
                    .unwrap_or_default(),
                teacher: teachers::resolve(teacher_map, &teacher_short),
                teacher_short,
                location: normalize_room(&caps[6]),
                time_slot: "N/A".to_string(),
                start_time: None,
                end_time: None,
                time_range: "N/A".to_string(),
                cancelled: false,
                lesson_id: None,
                description: None,
                has_homework_note: false,
            };
            lessons.push(lesson);
        }
    }

    lessons
}
