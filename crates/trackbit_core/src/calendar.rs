use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::routine::Routine;
use crate::schedule::parse_reminder_time;

const PRODID: &str = "-//Trackbit//Routines//EN";
const EVENT_MINUTES: i64 = 30;

struct DailyEvent {
    uid: String,
    summary: String,
    description: String,
    start: NaiveDateTime,
}

/// `YYYYMMDDThhmmssZ`.
fn utc_stamp(at: NaiveDateTime) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

fn render(events: &[DailyEvent], now: DateTime<Utc>) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{PRODID}"),
        "CALSCALE:GREGORIAN".to_string(),
    ];
    let stamp = utc_stamp(now.naive_utc());
    for event in events {
        lines.push("BEGIN:VEVENT".to_string());
        lines.push(format!("UID:{}", event.uid));
        lines.push(format!("DTSTAMP:{stamp}"));
        lines.push(format!("DTSTART:{}", utc_stamp(event.start)));
        lines.push(format!(
            "DTEND:{}",
            utc_stamp(event.start + Duration::minutes(EVENT_MINUTES))
        ));
        lines.push("RRULE:FREQ=DAILY".to_string());
        lines.push(format!("SUMMARY:{}", escape_text(&event.summary)));
        if !event.description.is_empty() {
            lines.push(format!("DESCRIPTION:{}", escape_text(&event.description)));
        }
        lines.push("END:VEVENT".to_string());
    }
    lines.push("END:VCALENDAR".to_string());
    let mut out = lines.join("\r\n");
    out.push_str("\r\n");
    out
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN))
}

/// Fixed daily morning (07:00) and evening (21:00) routine blocks starting on `start`.
pub fn export_default_routines_ics(start: NaiveDate, now: DateTime<Utc>) -> String {
    let events = [
        DailyEvent {
            uid: "morning-routine@trackbit".to_string(),
            summary: "Morning Routine".to_string(),
            description: "Start the day with your morning habits.".to_string(),
            start: at(start, 7, 0),
        },
        DailyEvent {
            uid: "evening-routine@trackbit".to_string(),
            summary: "Evening Routine".to_string(),
            description: "Wind down with your evening habits.".to_string(),
            start: at(start, 21, 0),
        },
    ];
    render(&events, now)
}

/// One daily event per active routine that has a reminder time.
pub fn export_routines_ics(routines: &[Routine], start: NaiveDate, now: DateTime<Utc>) -> String {
    let events: Vec<DailyEvent> = routines
        .iter()
        .filter(|routine| !routine.is_archived())
        .filter_map(|routine| {
            let time = parse_reminder_time(routine.reminder_time.as_deref()?).ok()?;
            Some(DailyEvent {
                uid: format!("{}@trackbit", routine.id),
                summary: routine.name.clone(),
                description: routine.description.clone().unwrap_or_default(),
                start: start.and_time(time),
            })
        })
        .collect();
    render(&events, now)
}
