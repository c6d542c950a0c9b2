//! Base datatype values and their ER7 text form.
//!
//! Text types are escaped with the message's escape character on the way out and
//! unescaped on the way in; formatting sequences (`\H\`, `\.br\`, `\X0D\`, ...) are part
//! of the logical text and pass through both directions untouched. Date/time types keep
//! the precision and UTC offset they were written with so a decoded value re-encodes to
//! the same text.

use crate::encoding::EncodingChars;
use crate::error::{Hl7Error, Result};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)$").expect("numeric pattern"));

static FORMATTING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(H|N|\.br|\.fi|\.nf|\.ce|\.sp\d*|\.in[+-]?\d+|\.ti[+-]?\d+|\.sk[+-]?\d+|X[0-9A-Fa-f]+|Z[^\s]*|C[0-9A-Fa-f]{4}|M[0-9A-Fa-f]{4}([0-9A-Fa-f]{2})?)$",
    )
    .expect("formatting pattern")
});

/// Granularity a date/time was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    /// Seconds plus 1..=4 fractional digits.
    Fraction(u8),
}

/// Decoded value of a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// ST, TX, FT, ID, IS, GTS and anything without a dedicated codec.
    Text(String),
    /// NM, SNM; kept as written, checked on decode.
    Numeric(String),
    /// SI.
    SequenceId(u64),
    /// DT.
    Date { date: NaiveDate, precision: Precision },
    /// DTM (and the time component of v2.5 TS).
    DateTime {
        datetime: NaiveDateTime,
        precision: Precision,
        offset: Option<FixedOffset>,
    },
    /// TM.
    Time {
        time: NaiveTime,
        precision: Precision,
        offset: Option<FixedOffset>,
    },
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Current local time with second precision, as used for MSH-7 of new messages.
    pub fn now() -> Self {
        let now = chrono::Local::now();
        Value::DateTime {
            datetime: now.naive_local(),
            precision: Precision::Second,
            offset: None,
        }
    }
}

impl fmt::Display for Value {
    /// Unescaped ER7 text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) | Value::Numeric(s) => f.write_str(s),
            Value::SequenceId(n) => write!(f, "{}", n),
            Value::Date { date, precision } => write_date(f, *date, *precision),
            Value::DateTime {
                datetime,
                precision,
                offset,
            } => {
                write_date(f, datetime.date(), *precision)?;
                if *precision > Precision::Day {
                    write_time(f, datetime.time(), *precision)?;
                }
                write_offset(f, *offset)
            }
            Value::Time {
                time,
                precision,
                offset,
            } => {
                write_time(f, *time, *precision)?;
                write_offset(f, *offset)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::SequenceId(n)
    }
}

impl From<NaiveDate> for Value {
    fn from(date: NaiveDate) -> Self {
        Value::Date {
            date,
            precision: Precision::Day,
        }
    }
}

impl From<NaiveDateTime> for Value {
    fn from(datetime: NaiveDateTime) -> Self {
        Value::DateTime {
            datetime,
            precision: Precision::Second,
            offset: None,
        }
    }
}

/// True for datatypes whose text is escaped on output.
pub fn is_text_type(datatype: &str) -> bool {
    !matches!(datatype, "NM" | "SNM" | "SI" | "DT" | "DTM" | "TM")
}

/// Largest encoded length accepted for a base datatype.
pub fn max_length(datatype: &str) -> Option<usize> {
    match datatype {
        "ST" | "GTS" => Some(199),
        "TX" | "FT" => Some(65536),
        "ID" => Some(16),
        "IS" => Some(20),
        "NM" | "SNM" => Some(16),
        "SI" => Some(4),
        "DT" => Some(8),
        "DTM" => Some(24),
        "TM" => Some(16),
        _ => None,
    }
}

/// Decode ER7 text (still escaped) as a value of `datatype`.
pub fn decode(datatype: &str, text: &str, enc: &EncodingChars) -> Result<Value> {
    let raw = unescape(text, enc);
    parse_value(datatype, &raw)
}

/// Build a value of `datatype` from unescaped text.
pub fn parse_value(datatype: &str, raw: &str) -> Result<Value> {
    let invalid = || Hl7Error::InvalidValue {
        datatype: datatype.to_string(),
        value: raw.to_string(),
    };
    // Empty and the explicit null `""` are valid for every type.
    if raw.is_empty() || raw == "\"\"" {
        return Ok(Value::Text(raw.to_string()));
    }
    match datatype {
        "NM" | "SNM" => {
            if NUMERIC.is_match(raw) {
                Ok(Value::Numeric(raw.to_string()))
            } else {
                Err(invalid())
            }
        }
        "SI" => raw
            .parse::<u64>()
            .map(Value::SequenceId)
            .map_err(|_| invalid()),
        "DT" => parse_date(raw)
            .map(|(date, precision)| Value::Date { date, precision })
            .ok_or_else(invalid),
        "DTM" => parse_datetime(raw).ok_or_else(invalid),
        "TM" => parse_time(raw).ok_or_else(invalid),
        _ => Ok(Value::Text(raw.to_string())),
    }
}

/// ER7 text of a value: escaped for text types, canonical form otherwise.
pub fn encode(value: &Value, enc: &EncodingChars) -> String {
    match value {
        Value::Text(s) => escape(s, enc),
        other => other.to_string(),
    }
}

/// Replace delimiter characters by their escape sequences.
pub fn escape(text: &str, enc: &EncodingChars) -> String {
    let chars: Vec<char> = text.chars().collect();
    let esc = enc.escape;
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == esc {
            if let Some(end) = formatting_end(&chars, i, enc) {
                out.extend(&chars[i..=end]);
                i = end + 1;
                continue;
            }
            push_sequence(&mut out, esc, "E");
        } else if c == enc.field {
            push_sequence(&mut out, esc, "F");
        } else if c == enc.component {
            push_sequence(&mut out, esc, "S");
        } else if c == enc.subcomponent {
            push_sequence(&mut out, esc, "T");
        } else if c == enc.repetition {
            push_sequence(&mut out, esc, "R");
        } else if Some(c) == enc.truncation {
            push_sequence(&mut out, esc, "L");
        } else {
            out.push(c);
        }
        i += 1;
    }
    out
}

/// Resolve delimiter escape sequences; formatting and unknown sequences stay verbatim.
pub fn unescape(text: &str, enc: &EncodingChars) -> String {
    let esc = enc.escape;
    if !text.contains(esc) {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != esc {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let close = chars[i + 1..].iter().position(|&c| c == esc).map(|p| p + i + 1);
        let Some(end) = close else {
            out.extend(&chars[i..]);
            break;
        };
        let body: String = chars[i + 1..end].iter().collect();
        let replacement = match body.as_str() {
            "F" => Some(enc.field),
            "S" => Some(enc.component),
            "T" => Some(enc.subcomponent),
            "R" => Some(enc.repetition),
            "E" => Some(esc),
            "L" => enc.truncation,
            _ => None,
        };
        match replacement {
            Some(c) => out.push(c),
            None => out.extend(&chars[i..=end]),
        }
        i = end + 1;
    }
    out
}

fn push_sequence(out: &mut String, esc: char, code: &str) {
    out.push(esc);
    out.push_str(code);
    out.push(esc);
}

/// Index of the closing escape char when `chars[start..]` opens a formatting sequence.
fn formatting_end(chars: &[char], start: usize, enc: &EncodingChars) -> Option<usize> {
    let end = chars[start + 1..]
        .iter()
        .position(|&c| c == enc.escape)
        .map(|p| p + start + 1)?;
    let body = &chars[start + 1..end];
    let delimiters = enc.delimiters();
    if body.is_empty() || body.iter().any(|c| delimiters.contains(c)) {
        return None;
    }
    let body: String = body.iter().collect();
    FORMATTING.is_match(&body).then_some(end)
}

fn digits(s: &str, from: usize, len: usize) -> Option<u32> {
    let part = s.get(from..from + len)?;
    if part.bytes().all(|b| b.is_ascii_digit()) {
        part.parse().ok()
    } else {
        None
    }
}

fn parse_date(s: &str) -> Option<(NaiveDate, Precision)> {
    let (month, day, precision) = match s.len() {
        4 => (1, 1, Precision::Year),
        6 => (digits(s, 4, 2)?, 1, Precision::Month),
        8 => (digits(s, 4, 2)?, digits(s, 6, 2)?, Precision::Day),
        _ => return None,
    };
    let year = digits(s, 0, 4)? as i32;
    NaiveDate::from_ymd_opt(year, month, day).map(|d| (d, precision))
}

/// Split a trailing `+HHMM`/`-HHMM` offset.
fn split_offset(s: &str) -> Option<(&str, Option<FixedOffset>)> {
    match s.find(['+', '-']) {
        None => Some((s, None)),
        Some(pos) => {
            let (body, off) = s.split_at(pos);
            if off.len() != 5 {
                return None;
            }
            let hours = digits(off, 1, 2)? as i32;
            let minutes = digits(off, 3, 2)? as i32;
            let secs = (hours * 3600 + minutes * 60) * if off.starts_with('-') { -1 } else { 1 };
            Some((body, Some(FixedOffset::east_opt(secs)?)))
        }
    }
}

fn parse_clock(s: &str) -> Option<(NaiveTime, Precision)> {
    let (whole, fraction) = match s.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (s, None),
    };
    let hour = digits(whole, 0, 2)?;
    let (minute, second, mut precision) = match whole.len() {
        2 => (0, 0, Precision::Hour),
        4 => (digits(whole, 2, 2)?, 0, Precision::Minute),
        6 => (digits(whole, 2, 2)?, digits(whole, 4, 2)?, Precision::Second),
        _ => return None,
    };
    let mut nanos = 0;
    if let Some(f) = fraction {
        if precision != Precision::Second || f.is_empty() || f.len() > 4 {
            return None;
        }
        let n = digits(f, 0, f.len())?;
        nanos = n * 10u32.pow(9 - f.len() as u32);
        precision = Precision::Fraction(f.len() as u8);
    }
    NaiveTime::from_hms_nano_opt(hour, minute, second, nanos).map(|t| (t, precision))
}

fn parse_time(s: &str) -> Option<Value> {
    let (body, offset) = split_offset(s)?;
    let (time, precision) = parse_clock(body)?;
    Some(Value::Time {
        time,
        precision,
        offset,
    })
}

fn parse_datetime(s: &str) -> Option<Value> {
    let (body, offset) = split_offset(s)?;
    let date_len = body.len().min(8);
    let (date, date_precision) = parse_date(body.get(..date_len)?)?;
    let (time, precision) = if body.len() > 8 {
        if date_precision != Precision::Day {
            return None;
        }
        parse_clock(&body[8..])?
    } else {
        (NaiveTime::from_hms_opt(0, 0, 0)?, date_precision)
    };
    Some(Value::DateTime {
        datetime: date.and_time(time),
        precision,
        offset,
    })
}

fn write_date(f: &mut fmt::Formatter<'_>, date: NaiveDate, precision: Precision) -> fmt::Result {
    write!(f, "{:04}", date.year())?;
    if precision >= Precision::Month {
        write!(f, "{:02}", date.month())?;
    }
    if precision >= Precision::Day {
        write!(f, "{:02}", date.day())?;
    }
    Ok(())
}

fn write_time(f: &mut fmt::Formatter<'_>, time: NaiveTime, precision: Precision) -> fmt::Result {
    write!(f, "{:02}", time.hour())?;
    if precision >= Precision::Minute {
        write!(f, "{:02}", time.minute())?;
    }
    if precision >= Precision::Second {
        write!(f, "{:02}", time.second())?;
    }
    if let Precision::Fraction(n) = precision {
        let scaled = time.nanosecond() / 10u32.pow(9 - n as u32);
        write!(f, ".{:0width$}", scaled, width = n as usize)?;
    }
    Ok(())
}

fn write_offset(f: &mut fmt::Formatter<'_>, offset: Option<FixedOffset>) -> fmt::Result {
    if let Some(off) = offset {
        let secs = off.local_minus_utc();
        let sign = if secs < 0 { '-' } else { '+' };
        let secs = secs.abs();
        write!(f, "{}{:02}{:02}", sign, secs / 3600, (secs % 3600) / 60)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc() -> EncodingChars {
        EncodingChars::default()
    }

    #[test]
    fn escapes_every_delimiter() {
        let text = "a|b^c&d~e\\f";
        let escaped = escape(text, &enc());
        assert_eq!(escaped, "a\\F\\b\\S\\c\\T\\d\\R\\e\\E\\f");
        assert_eq!(unescape(&escaped, &enc()), text);
    }

    #[test]
    fn formatting_sequences_pass_through() {
        let text = "line\\.br\\next \\H\\bold\\N\\ \\X0D\\";
        assert_eq!(escape(text, &enc()), text);
        assert_eq!(unescape(text, &enc()), text);
    }

    #[test]
    fn truncation_is_escaped_when_present() {
        let enc = enc().with_truncation('#').expect("truncation");
        assert_eq!(escape("1#2", &enc), "1\\L\\2");
        assert_eq!(unescape("1\\L\\2", &enc), "1#2");
        assert_eq!(escape("1#2", &EncodingChars::default()), "1#2");
    }

    #[test]
    fn unterminated_escape_is_kept() {
        assert_eq!(unescape("abc\\F", &enc()), "abc\\F");
    }

    #[test]
    fn numeric_values() {
        assert_eq!(
            decode("NM", "-12.50", &enc()).expect("nm"),
            Value::Numeric("-12.50".into())
        );
        assert!(decode("NM", "twelve", &enc()).is_err());
        assert_eq!(decode("SI", "3", &enc()).expect("si"), Value::SequenceId(3));
        assert!(decode("SI", "-1", &enc()).is_err());
    }

    #[test]
    fn dates_keep_precision() {
        for text in ["2024", "202401", "20240131"] {
            let v = decode("DT", text, &enc()).expect("dt");
            assert_eq!(v.to_string(), text);
        }
        assert!(decode("DT", "20240231", &enc()).is_err());
    }

    #[test]
    fn datetimes_keep_precision_and_offset() {
        for text in [
            "20240101",
            "2024010112",
            "202401011230",
            "20240101123045",
            "20240101123045.12",
            "20240101123045.1234-0500",
            "20240101000000+0100",
        ] {
            let v = decode("DTM", text, &enc()).expect(text);
            assert_eq!(encode(&v, &enc()), text);
        }
        assert!(decode("DTM", "2024010112304", &enc()).is_err());
        assert!(decode("DTM", "20240101+05", &enc()).is_err());
    }

    #[test]
    fn times() {
        let v = decode("TM", "0930", &enc()).expect("tm");
        assert_eq!(v.to_string(), "0930");
        assert!(decode("TM", "2560", &enc()).is_err());
    }

    #[test]
    fn text_types() {
        assert!(is_text_type("ST"));
        assert!(is_text_type("varies"));
        assert!(!is_text_type("NM"));
        assert_eq!(max_length("SI"), Some(4));
        assert_eq!(max_length("XPN"), None);
    }
}
