//! Date — moment-style date formats compiled to chrono and parsed strictly.
//!
//! Pattern files declare formats with the familiar `YYYY-MM-DD HH:mm:ss`
//! token style. Each format is translated once, at load time, into a chrono
//! `strftime` pattern plus a few flags describing which components it
//! carries, so the per-line cost is a single chrono parse.
//!
//! Formats without a year are completed with the current year; formats
//! without a date are anchored to today. Timestamps without an offset are
//! read as UTC.

use std::borrow::Cow;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Year,
    Date,
    Time,
    Offset,
    Epoch,
    Other,
}

/// Offsets as moment reads them: `Z`, `+hh`, `+hhmm` or `+hh:mm`.
const OFFSET_SHAPE: &str = r"(?:[Zz]|[+-]\d{2}(?::?\d{2})?)";

// Longest tokens first where one is a prefix of another.
// (token, chrono item, accepted input shape, component)
const TOKENS: &[(&str, &str, &str, Component)] = &[
    ("YYYY", "%Y", r"\d{4}", Component::Year),
    ("YY", "%y", r"\d{2}", Component::Year),
    ("MMMM", "%B", r"[A-Za-z]+", Component::Date),
    ("MMM", "%b", r"[A-Za-z]{3}", Component::Date),
    ("MM", "%m", r"\d{2}", Component::Date),
    ("M", "%m", r"\d{1,2}", Component::Date),
    ("DDDD", "%j", r"\d{3}", Component::Date),
    ("DD", "%d", r"\d{2}", Component::Date),
    ("D", "%d", r"\d{1,2}", Component::Date),
    ("dddd", "%A", r"[A-Za-z]+", Component::Other),
    ("ddd", "%a", r"[A-Za-z]{3}", Component::Other),
    ("HH", "%H", r"\d{2}", Component::Time),
    ("H", "%H", r"\d{1,2}", Component::Time),
    ("hh", "%I", r"\d{2}", Component::Time),
    ("h", "%I", r"\d{1,2}", Component::Time),
    ("mm", "%M", r"\d{2}", Component::Time),
    ("m", "%M", r"\d{1,2}", Component::Time),
    ("ss", "%S", r"\d{2}", Component::Time),
    ("s", "%S", r"\d{1,2}", Component::Time),
    ("SSSSSSSSS", "%9f", r"\d{9}", Component::Time),
    ("SSSSSS", "%6f", r"\d{6}", Component::Time),
    ("SSS", "%3f", r"\d{3}", Component::Time),
    ("A", "%p", r"(?i:am|pm)", Component::Other),
    ("a", "%p", r"(?i:am|pm)", Component::Other),
    ("ZZ", "%:z", OFFSET_SHAPE, Component::Offset),
    ("Z", "%:z", OFFSET_SHAPE, Component::Offset),
    ("X", "%s", r"-?\d+", Component::Epoch),
];

/// A compiled date format.
///
/// Input is first checked against a strict shape (zero padding, literal
/// separators, nothing trailing), then handed to chrono. Offsets are
/// rewritten to `+hh:mm` in between, so `Z` and colon-less offsets parse.
#[derive(Debug, Clone)]
pub struct DateFormat {
    source: String,
    pattern: String,
    shape: Option<Regex>,
    has_year: bool,
    has_date: bool,
    has_time: bool,
    has_offset: bool,
    epoch: bool,
}

impl PartialEq for DateFormat {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for DateFormat {}

impl DateFormat {
    /// Translate a moment-style format. Text inside `[...]` is literal.
    pub fn from_moment(format: &str) -> Self {
        let format = format.trim();
        let mut pattern = String::with_capacity(format.len() * 2);
        let mut shape = String::from("^");
        let mut components = Vec::new();

        let mut rest = format;
        'outer: while let Some(c) = rest.chars().next() {
            if c == '[' {
                if let Some(end) = rest.find(']') {
                    push_literal(&mut pattern, &mut shape, &rest[1..end]);
                    rest = &rest[end + 1..];
                    continue;
                }
            }
            for (token, replacement, accepts, component) in TOKENS {
                if rest.starts_with(token) {
                    pattern.push_str(replacement);
                    if *component == Component::Offset && !components.contains(component) {
                        shape.push_str(&format!("(?P<offset>{})", accepts));
                    } else {
                        shape.push_str(accepts);
                    }
                    components.push(*component);
                    rest = &rest[token.len()..];
                    continue 'outer;
                }
            }
            push_literal(&mut pattern, &mut shape, &rest[..c.len_utf8()]);
            rest = &rest[c.len_utf8()..];
        }
        shape.push('$');

        let has = |wanted: Component| components.contains(&wanted);
        Self {
            source: format.to_string(),
            pattern,
            shape: Regex::new(&shape).ok(),
            has_year: has(Component::Year),
            has_date: has(Component::Year) || has(Component::Date),
            has_time: has(Component::Time),
            has_offset: has(Component::Offset),
            epoch: has(Component::Epoch),
        }
    }

    /// The format as declared.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The translated chrono pattern.
    pub fn chrono_pattern(&self) -> &str {
        &self.pattern
    }

    pub fn parse(&self, input: &str) -> Option<DateTime<Utc>> {
        self.parse_at(input, Utc::now().date_naive())
    }

    /// Parse relative to `today`, which supplies missing year or date parts.
    pub fn parse_at(&self, input: &str, today: NaiveDate) -> Option<DateTime<Utc>> {
        let input = self.conform(input)?;
        let input = input.as_ref();

        if self.epoch {
            return NaiveDateTime::parse_from_str(input, &self.pattern)
                .ok()
                .map(|n| n.and_utc());
        }

        if !self.has_date {
            if !self.has_time {
                return None;
            }
            let time = NaiveTime::parse_from_str(input, &self.pattern).ok()?;
            return Some(today.and_time(time).and_utc());
        }

        let (input, pattern) = if self.has_year {
            (input.to_string(), self.pattern.clone())
        } else {
            (format!("{} {}", today.year(), input), format!("%Y {}", self.pattern))
        };

        if self.has_offset {
            DateTime::parse_from_str(&input, &pattern)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        } else if self.has_time {
            NaiveDateTime::parse_from_str(&input, &pattern)
                .ok()
                .map(|n| n.and_utc())
        } else {
            NaiveDate::parse_from_str(&input, &pattern)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|n| n.and_utc())
        }
    }

    /// Reject input that does not have the declared shape, and rewrite the
    /// offset (if any) to the `+hh:mm` form chrono expects.
    fn conform<'a>(&self, input: &'a str) -> Option<Cow<'a, str>> {
        let Some(shape) = &self.shape else {
            return Some(Cow::Borrowed(input));
        };
        let captures = shape.captures(input)?;
        match captures.name("offset") {
            Some(m) => Some(Cow::Owned(format!(
                "{}{}{}",
                &input[..m.start()],
                canonical_offset(m.as_str()),
                &input[m.end()..]
            ))),
            None => Some(Cow::Borrowed(input)),
        }
    }
}

fn canonical_offset(raw: &str) -> String {
    if raw.eq_ignore_ascii_case("z") {
        return "+00:00".to_string();
    }
    let (sign, digits) = raw.split_at(1);
    let digits = digits.replace(':', "");
    if digits.len() == 2 {
        format!("{}{}:00", sign, digits)
    } else {
        format!("{}{}:{}", sign, &digits[..2], &digits[2..])
    }
}

fn push_literal(pattern: &mut String, shape: &mut String, text: &str) {
    shape.push_str(&regex::escape(text));
    for c in text.chars() {
        if c == '%' {
            pattern.push_str("%%");
        } else {
            pattern.push(c);
        }
    }
}

/// Parse a raw timestamp with the primary format, then each fallback in
/// order. The input is trimmed and its first double space collapsed.
pub fn parse_date(
    raw: &str,
    primary: Option<&DateFormat>,
    fallbacks: &[DateFormat],
) -> Option<DateTime<Utc>> {
    let normalized = raw.trim().replacen("  ", " ", 1);
    if normalized.is_empty() {
        return None;
    }
    primary
        .into_iter()
        .chain(fallbacks.iter())
        .find_map(|format| format.parse(&normalized))
}
