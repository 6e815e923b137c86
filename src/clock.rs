use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};

/// Current UTC time in the store's canonical timestamp form.
pub fn now_utc() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

/// RFC3339 in UTC with a fixed six-digit fraction, so stored timestamps
/// sort lexicographically in chronological order.
pub fn format_timestamp(value: OffsetDateTime) -> String {
    let utc = value.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}Z",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
        utc.microsecond()
    )
}

pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339)
}

/// Parses any RFC3339 input and re-renders it canonically.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let parsed = parse_timestamp(raw).ok()?;
    if !(1970..=9999).contains(&parsed.to_offset(UtcOffset::UTC).year()) {
        return None;
    }
    Some(format_timestamp(parsed))
}

/// Timestamp for the next mutation of a row last stamped `previous`.
///
/// Never returns a value at or before `previous`, even if the wall clock
/// went backwards.
pub fn next_update_stamp(previous: &str) -> String {
    let now = OffsetDateTime::now_utc();
    match parse_timestamp(previous) {
        Ok(prev) if now <= prev => format_timestamp(prev + Duration::microseconds(1)),
        _ => format_timestamp(now),
    }
}
