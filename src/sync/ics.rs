//! Turns iCalendar feed bodies into read-only events.

use crate::calendar::{Event, Location};
use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime, TimeZone, Utc};
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IcsError {
    #[error("Malformed iCalendar content: {0}")]
    Malformed(String),
}

/// Parse every VEVENT in `content`. Floating and all-day times are read in `offset`.
/// Events without a usable DTSTART are skipped.
pub fn parse_feed(content: &str, offset: FixedOffset) -> Result<Vec<Event>, IcsError> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(IcsError::Malformed)?;

    let mut vevents = Vec::new();
    collect_vevents(&calendar.components, &mut vevents);

    let events = vevents
        .into_iter()
        .filter_map(|vevent| {
            let parsed = parse_vevent(vevent, offset);
            if parsed.is_none() {
                tracing::warn!("Skipping VEVENT without a usable DTSTART");
            }
            parsed
        })
        .collect();

    Ok(events)
}

fn collect_vevents<'c, 'a>(components: &'c [Component<'a>], out: &mut Vec<&'c Component<'a>>) {
    for component in components {
        if component.name == "VEVENT" {
            out.push(component);
        } else {
            collect_vevents(&component.components, out);
        }
    }
}

fn parse_vevent(vevent: &Component<'_>, offset: FixedOffset) -> Option<Event> {
    let start = to_utc(DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?, offset);
    let end = vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(|dpt| to_utc(dpt, offset));

    let title = text_prop(vevent, "SUMMARY").unwrap_or_else(|| "(No title)".to_string());
    let description = text_prop(vevent, "DESCRIPTION");
    let location = text_prop(vevent, "LOCATION").map(|name| Location {
        name,
        latitude: 0.0,
        longitude: 0.0,
    });

    Some(Event {
        id: None,
        title,
        description,
        start,
        end,
        reminder_minutes: 0,
        location,
        subscription_id: None,
    })
}

fn text_prop(component: &Component<'_>, name: &str) -> Option<String> {
    component
        .find_prop(name)
        .map(|p: &Property<'_>| unescape_text(&p.val.to_string()))
        .filter(|value| !value.trim().is_empty())
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn to_utc(dpt: DatePerhapsTime, offset: FixedOffset) -> DateTime<Utc> {
    match dpt {
        DatePerhapsTime::Date(date) => in_offset(date.and_time(NaiveTime::MIN), offset),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            CalendarDateTime::Utc(dt) => dt,
            CalendarDateTime::Floating(naive) => in_offset(naive, offset),
            CalendarDateTime::WithTimezone { date_time, tzid } => {
                match tzid.parse::<chrono_tz::Tz>() {
                    Ok(tz) => tz
                        .from_local_datetime(&date_time)
                        .earliest()
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|| in_offset(date_time, offset)),
                    Err(_) => {
                        tracing::warn!("Unknown TZID {}, using configured offset", tzid);
                        in_offset(date_time, offset)
                    }
                }
            }
        },
    }
}

fn in_offset(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    // A fixed offset maps every local time to exactly one instant.
    (naive - chrono::Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
}
