//! Raw log line → structured [`LogLine`].
//!
//! Recognised shapes, tried in order:
//! - `[12:00:00] [Server thread/INFO]: msg`
//! - `[2024-01-01 12:00:00] [WARN] [source] msg`
//! - `2024-05-01T08:30:00+0000 host unit[123]: msg` (journalctl `-o short-iso`)
//! - `2024-01-01T12:00:00.123Z ERROR [source] msg`
//! - `Oct 19 07:11:02 host unit[123]: msg` (syslog / journalctl `-o short`)
//! - `WARN: msg`
//!
//! Anything else becomes an `INFO` record stamped with the receive time.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::LogLine;

const ISO_TS: &str = r"\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?";

static THREAD_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[(?P<ts>\d{2}:\d{2}:\d{2})\]\s*\[(?P<thread>[^\]/]+)/(?P<level>[A-Za-z]+)\]:?\s*(?P<msg>.*)$",
    )
    .expect("thread/level pattern")
});

static BRACKETED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\[(?P<ts>{ISO_TS})\]\s*\[(?P<level>[A-Za-z]+)\]\s*(?:\[(?P<source>[^\]]+)\]\s*)?(?P<msg>.*)$"
    ))
    .expect("bracketed pattern")
});

static BARE_ISO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<ts>{ISO_TS})\s+(?P<level>[A-Za-z]+)\s+(?:\[(?P<source>[^\]]+)\]\s*)?(?P<msg>.*)$"
    ))
    .expect("iso pattern")
});

static JOURNAL_ISO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<ts>{ISO_TS})\s+(?P<host>\S+)\s+(?P<source>[^\[\s:]+)(?:\[(?P<thread>\d+)\])?:\s?(?P<msg>.*)$"
    ))
    .expect("journal iso pattern")
});

static SYSLOG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>[A-Z][a-z]{2}\s+\d{1,2} \d{2}:\d{2}:\d{2}) \S+ (?P<source>[^\[\s:]+)(?:\[(?P<thread>\d+)\])?:\s?(?P<msg>.*)$",
    )
    .expect("syslog pattern")
});

static LEVEL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<level>[A-Za-z]+):\s+(?P<msg>.*)$").expect("level prefix pattern")
});

/// Maps the many spellings of a level onto `TRACE|DEBUG|INFO|WARN|ERROR|FATAL`.
pub fn normalize_level(raw: &str) -> Option<&'static str> {
    match raw.to_ascii_uppercase().as_str() {
        "TRACE" | "FINEST" | "FINER" => Some("TRACE"),
        "DEBUG" | "FINE" | "DBG" => Some("DEBUG"),
        "INFO" | "INFORMATION" | "NOTICE" | "INF" => Some("INFO"),
        "WARN" | "WARNING" | "WRN" => Some("WARN"),
        "ERROR" | "ERR" | "SEVERE" => Some("ERROR"),
        "FATAL" | "CRITICAL" | "CRIT" | "EMERG" | "ALERT" => Some("FATAL"),
        _ => None,
    }
}

// journald messages often lead with their own level word
fn level_from_message(msg: &str) -> &'static str {
    msg.split(|c: char| c.is_whitespace() || c == ':' || c == ']' || c == '[')
        .find(|t| !t.is_empty())
        .and_then(normalize_level)
        .unwrap_or("INFO")
}

fn fill_unit_fields(line: &mut LogLine, c: &regex::Captures<'_>) {
    line.source = Some(c["source"].to_string());
    line.thread_id = c.name("thread").map(|m| m.as_str().to_string());
    line.message = c["msg"].to_string();
    line.level = level_from_message(&line.message).to_string();
}

pub fn parse_line(instance: &str, raw: &str, received_at: DateTime<Utc>) -> LogLine {
    let text = raw.trim_end_matches(['\r', '\n']);
    let mut line = LogLine {
        instance_name: instance.to_string(),
        timestamp: received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        level: "INFO".to_string(),
        message: text.to_string(),
        source: None,
        thread_id: None,
        raw_line: raw.to_string(),
    };

    if let Some(c) = THREAD_LEVEL.captures(text) {
        if let Some(level) = normalize_level(&c["level"]) {
            line.timestamp = c["ts"].to_string();
            line.level = level.to_string();
            line.thread_id = Some(c["thread"].trim().to_string());
            line.message = c["msg"].to_string();
            return line;
        }
    }

    if let Some(c) = JOURNAL_ISO.captures(text) {
        // `2024-.. ERROR db: msg` is a levelled line, not a host named ERROR
        if normalize_level(&c["host"]).is_none() {
            line.timestamp = c["ts"].to_string();
            fill_unit_fields(&mut line, &c);
            return line;
        }
    }

    for re in [&*BRACKETED, &*BARE_ISO] {
        if let Some(c) = re.captures(text) {
            line.timestamp = c["ts"].to_string();
            match normalize_level(&c["level"]) {
                Some(level) => {
                    line.level = level.to_string();
                    line.source = c.name("source").map(|m| m.as_str().to_string());
                    line.message = c["msg"].to_string();
                }
                None => {
                    // timestamp only; keep the rest verbatim
                    let ts_end = c.name("ts").map_or(0, |m| m.end());
                    line.message = text[ts_end..]
                        .trim_start_matches([']', ' '])
                        .to_string();
                }
            }
            return line;
        }
    }

    if let Some(c) = SYSLOG.captures(text) {
        line.timestamp = c["ts"].to_string();
        fill_unit_fields(&mut line, &c);
        return line;
    }

    if let Some(c) = LEVEL_PREFIX.captures(text) {
        if let Some(level) = normalize_level(&c["level"]) {
            line.level = level.to_string();
            line.message = c["msg"].to_string();
        }
    }
    line
}
