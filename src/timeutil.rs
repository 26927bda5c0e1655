use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Parses an upstream ISO-8601 timestamp (always UTC, `Z`-suffixed) into
/// Unix seconds. Returns `None` for missing or unparseable input rather
/// than failing the whole snapshot — matches the defensive stance on
/// malformed upstream fields (Design Notes: "dynamic snapshot shape").
pub fn iso_to_unix(ts: Option<&str>) -> Option<i64> {
    let ts = ts?;
    OffsetDateTime::parse(ts, &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp())
}

/// Renders Unix seconds as a UTC ISO-8601 timestamp with a `Z` suffix, the
/// wire format used throughout spec.md §6.
pub fn unix_to_iso(ts: Option<i64>) -> Option<String> {
    let ts = ts?;
    let dt = OffsetDateTime::from_unix_timestamp(ts).ok()?;
    let formatted = dt.format(&Rfc3339).ok()?;
    Some(formatted.replace("+00:00", "Z"))
}

/// Current Unix time, used to stamp a `FetchRun` when the caller doesn't
/// supply one explicitly.
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
