//! Opening hours: free text such as `Monday: 12:00 – 2:30 PM, 7:00 – 10:30 PM`
//! into `{ "Lundi": { "service_1": "12:00 - 14:30", ... }, ... }`.

use chrono::NaiveTime;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use super::transform::{clean_text, parse_bracketed_list};

pub const DAYS_EN: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];
pub const DAYS_FR: [&str; 7] = [
    "Lundi", "Mardi", "Mercredi", "Jeudi", "Vendredi", "Samedi", "Dimanche",
];

fn day_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(Monday|Tuesday|Wednesday|Thursday|Friday|Saturday|Sunday|Lundi|Mardi|Mercredi|Jeudi|Vendredi|Samedi|Dimanche):\s*",
        )
        .expect("valid day regex")
    })
}

fn range_12h() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2}:\d{2})\s*([APMapm]{2})?\s*-\s*(\d{1,2}:\d{2})\s*([APMapm]{2})")
            .expect("valid 12h regex")
    })
}

fn range_24h() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,2}:\d{2})\s*-\s*(\d{1,2}:\d{2})").expect("valid 24h regex"))
}

fn closed_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(closed|ferm[ée]?)\b").expect("valid closed regex"))
}

fn day_to_french(day: &str) -> &str {
    DAYS_EN
        .iter()
        .position(|d| *d == day)
        .map(|i| DAYS_FR[i])
        .unwrap_or(day)
}

/// `7:30` + `PM` → `19:30`. A bare 24 h time is returned as written;
/// anything unparsable is returned unchanged.
fn to_24h(hour: &str, suffix: &str) -> String {
    let hour = hour.trim();
    if suffix.is_empty() {
        return hour.to_string();
    }
    NaiveTime::parse_from_str(&format!("{} {}", hour, suffix.to_ascii_uppercase()), "%I:%M %p")
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|_| hour.to_string())
}

fn extract_slot_range(slot: &str) -> Option<String> {
    let slot = clean_text(slot);
    if let Some(caps) = range_12h().captures(&slot) {
        let end_suffix = caps.get(4).map_or("", |m| m.as_str());
        let start_suffix = caps.get(2).map_or(end_suffix, |m| m.as_str());
        return Some(format!(
            "{} - {}",
            to_24h(&caps[1], start_suffix),
            to_24h(&caps[3], end_suffix)
        ));
    }
    range_24h()
        .captures(&slot)
        .map(|caps| format!("{} - {}", to_24h(&caps[1], ""), to_24h(&caps[2], "")))
}

fn closed() -> Value {
    json!({ "closed": true })
}

/// One day's text into numbered services, or `closed` when nothing parses.
pub fn parse_day_slots(text: &str) -> Value {
    let text = clean_text(text);
    if text.is_empty() || closed_pattern().is_match(&text) {
        return closed();
    }
    let services: Map<String, Value> = text
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(extract_slot_range)
        .enumerate()
        .map(|(i, range)| (format!("service_{}", i + 1), Value::String(range)))
        .collect();
    if services.is_empty() {
        closed()
    } else {
        Value::Object(services)
    }
}

/// Splits the text on day names, French day names as keys. Text before the
/// first day name is ignored; a repeated day keeps its last value.
pub fn split_hours_by_day(hours: &str) -> Vec<(String, String)> {
    let cleaned = clean_text(hours);
    let text = match parse_bracketed_list(&cleaned) {
        Some(items) => items.join("\n"),
        None => cleaned,
    };
    let matches: Vec<_> = day_pattern().captures_iter(&text).collect();
    let mut days: Vec<(String, String)> = Vec::new();
    for (i, caps) in matches.iter().enumerate() {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        let day = day_to_french(&caps[1]).to_string();
        let value = text[whole.end..end].trim().to_string();
        days.retain(|(d, _)| *d != day);
        days.push((day, value));
    }
    days
}

/// Structured hours for every day of the week. Empty input gives `{}`.
pub fn process_hours(hours: &str) -> Map<String, Value> {
    let mut structured = Map::new();
    if clean_text(hours).is_empty() {
        return structured;
    }
    for (day, value) in split_hours_by_day(hours) {
        structured.insert(day, parse_day_slots(&value));
    }
    for day in DAYS_FR {
        structured.entry(day).or_insert_with(closed);
    }
    structured
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_hour_ranges_are_converted() {
        let hours = process_hours(
            "Monday: 12:00 – 2:30 PM, 7:00 – 10:30 PM Tuesday: Closed Wednesday: 11:30 AM – 3:00 PM",
        );
        assert_eq!(
            hours["Lundi"],
            json!({ "service_1": "12:00 - 14:30", "service_2": "19:00 - 22:30" })
        );
        assert_eq!(hours["Mardi"], json!({ "closed": true }));
        assert_eq!(hours["Mercredi"], json!({ "service_1": "11:30 - 15:00" }));
        assert_eq!(hours["Dimanche"], json!({ "closed": true }));
        assert_eq!(hours.len(), 7);
    }

    #[test]
    fn french_days_and_24h_ranges() {
        let hours = process_hours("Lundi: 08:00-18:00; Samedi: fermé");
        assert_eq!(hours["Lundi"], json!({ "service_1": "08:00 - 18:00" }));
        assert_eq!(hours["Samedi"], json!({ "closed": true }));
    }

    #[test]
    fn bracketed_list_is_accepted() {
        let hours = process_hours("['Monday: 9:00 AM – 5:00 PM', 'Sunday: Closed']");
        assert_eq!(hours["Lundi"], json!({ "service_1": "09:00 - 17:00" }));
        assert_eq!(hours["Dimanche"], json!({ "closed": true }));
    }

    #[test]
    fn unparsable_day_is_closed_and_empty_input_is_empty() {
        assert_eq!(parse_day_slots("sur réservation"), json!({ "closed": true }));
        assert!(process_hours("  ").is_empty());
    }
}
