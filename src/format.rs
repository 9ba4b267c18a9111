use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};

/// Default namespace of every TCX v2 element.
pub const TCX_NAMESPACE: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2";

/// Published location of the TCX v2 schema, used in `xsi:schemaLocation`.
pub const TCX_SCHEMA_URL: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabasev2.xsd";

pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Timestamp layout used for every date written to a document.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// A duration counted in hundredths of a second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Centiseconds(pub u32);

impl Centiseconds {
    /// Round fractional seconds to the nearest hundredth.
    ///
    /// Returns `None` for negative or non-finite values and for durations
    /// that do not fit the centisecond range.
    pub fn from_seconds(seconds: f64) -> Option<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        let centis = (seconds * 100.0).round();
        (centis <= f64::from(u32::MAX)).then_some(Self(centis as u32))
    }

    pub fn as_seconds(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn as_duration(self) -> TimeDelta {
        TimeDelta::milliseconds(i64::from(self.0) * 10)
    }
}

impl std::ops::Add for Centiseconds {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl std::iter::Sum for Centiseconds {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, c| acc + c)
    }
}

/// Render a timestamp as `YYYY-MM-DDThh:mm:ss.sssZ`.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an `xsd:dateTime`. Values without a zone designator are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if !is_date_time_lexical(text) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse an `xsd:double`, including the `INF`, `-INF` and `NaN` literals.
pub fn parse_double(text: &str) -> Option<f64> {
    match text.trim() {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        other if is_decimal_lexical(other) => other.parse::<f64>().ok(),
        _ => None,
    }
}

/// `[+-]? (digits ('.' digits?)? | '.' digits) ([eE] [+-]? digits)?`
fn is_decimal_lexical(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));

    let int_digits = count_digits(&bytes[i..]);
    i += int_digits;
    let mut frac_digits = 0;
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        frac_digits = count_digits(&bytes[i..]);
        i += frac_digits;
    }
    if int_digits + frac_digits == 0 {
        return false;
    }

    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        i += 1;
        i += usize::from(matches!(bytes.get(i), Some(b'+' | b'-')));
        let exp_digits = count_digits(&bytes[i..]);
        if exp_digits == 0 {
            return false;
        }
        i += exp_digits;
    }
    i == bytes.len()
}

/// `YYYY-MM-DD 'T' hh:mm:ss ('.' digits)? ('Z' | [+-]hh:mm)?`
fn is_date_time_lexical(text: &str) -> bool {
    let bytes = text.as_bytes();
    let year = count_digits(bytes);
    if year < 4 {
        return false;
    }
    let Some(rest) = bytes.get(year..) else {
        return false;
    };
    let Some(rest) = expect_fields(rest, b"-dd-ddTdd:dd:dd") else {
        return false;
    };

    let rest = match rest.split_first() {
        Some((b'.', tail)) => {
            let n = count_digits(tail);
            if n == 0 {
                return false;
            }
            &tail[n..]
        }
        _ => rest,
    };

    match rest {
        [] | [b'Z'] => true,
        [b'+' | b'-', zone @ ..] => expect_fields(zone, b"dd:dd").is_some_and(<[u8]>::is_empty),
        _ => false,
    }
}

/// Match `pattern` at the start of `bytes`, `d` standing for any digit.
fn expect_fields<'a>(bytes: &'a [u8], pattern: &[u8]) -> Option<&'a [u8]> {
    if bytes.len() < pattern.len() {
        return None;
    }
    let (head, tail) = bytes.split_at(pattern.len());
    let matched = head.iter().zip(pattern).all(|(b, p)| match p {
        b'd' => b.is_ascii_digit(),
        literal => b == literal,
    });
    matched.then_some(tail)
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Render an `xsd:double`. Finite values use the shortest round-trip form.
pub fn format_double(value: f64) -> String {
    if value == f64::INFINITY {
        "INF".to_string()
    } else if value == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        value.to_string()
    }
}

/// Convert a semicircle angle (2^31 = 180 degrees) to decimal degrees.
pub fn semicircles_to_degrees(semicircles: i32) -> f64 {
    f64::from(semicircles) * 180.0 / 2_147_483_648.0
}

/// Keep a heart rate only if it is a real reading.
pub(crate) fn known_heart_rate(bpm: u8) -> Option<u8> {
    (bpm > 0).then_some(bpm)
}

/// Keep a cadence only if the schema can carry it. 255 is the invalid marker.
pub(crate) fn known_cadence(rpm: u8) -> Option<u8> {
    (rpm < u8::MAX).then_some(rpm)
}

/// An entity reference that is neither predefined nor a valid character reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnknownEntity(pub String);

/// Append the character data carried by a text-like event.
/// Handles regular text, CDATA sections and entity references (Event::GeneralRef).
/// Returns `false` for events that carry no character data.
pub(crate) fn append_event_text(
    event: &Event<'_>,
    text: &mut String,
) -> Result<bool, UnknownEntity> {
    match event {
        Event::Text(e) => {
            text.push_str(&String::from_utf8_lossy(e.as_ref()));
        }
        Event::CData(e) => {
            text.push_str(&String::from_utf8_lossy(e.as_ref()));
        }
        Event::GeneralRef(e) => {
            let name: &[u8] = e.as_ref();
            if e.is_char_ref() {
                match e.resolve_char_ref() {
                    Ok(Some(ch)) => text.push(ch),
                    _ => return Err(UnknownEntity(String::from_utf8_lossy(name).into_owned())),
                }
            } else {
                // Predefined XML entities: amp, lt, gt, quot, apos
                let ch = match name {
                    b"amp" => '&',
                    b"lt" => '<',
                    b"gt" => '>',
                    b"quot" => '"',
                    b"apos" => '\'',
                    _ => return Err(UnknownEntity(String::from_utf8_lossy(name).into_owned())),
                };
                text.push(ch);
            }
        }
        _ => return Ok(false),
    }
    Ok(true)
}
