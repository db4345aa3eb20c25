//! Date, time and interval text formats (ISO output style).
//!
//! Values count from the PostgreSQL epoch, 2000-01-01. Civil date
//! arithmetic uses the proleptic Gregorian calendar.

use crate::context::IntervalStyle;
use crate::error::{Error, Result};
use crate::value::{Interval, MICROS_PER_DAY, MICROS_PER_SECOND, PG_EPOCH_DAYS_FROM_UNIX};

const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

fn invalid(what: &str, text: &str) -> Error {
    Error::Decode(format!("invalid {} value: {:?}", what, text))
}

/// Days since 1970-01-01 of a civil date.
pub fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date of a day count since 1970-01-01.
pub fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        _ => 28,
    }
}

fn push_year(out: &mut String, year: i64) -> bool {
    // Year 0 is 1 BC
    if year <= 0 {
        out.push_str(&format!("{:04}", 1 - year));
        true
    } else {
        out.push_str(&format!("{:04}", year));
        false
    }
}

fn format_civil_date(out: &mut String, pg_days: i64) -> bool {
    let (year, month, day) = civil_from_days(pg_days + i64::from(PG_EPOCH_DAYS_FROM_UNIX));
    let bc = push_year(out, year);
    out.push_str(&format!("-{:02}-{:02}", month, day));
    bc
}

/// `YYYY-MM-DD`, with ` BC` for years before 1.
pub fn format_date(days: i32) -> String {
    match days {
        i32::MAX => "infinity".into(),
        i32::MIN => "-infinity".into(),
        _ => {
            let mut out = String::with_capacity(13);
            if format_civil_date(&mut out, i64::from(days)) {
                out.push_str(" BC");
            }
            out
        }
    }
}

/// Split a trailing ` BC` / ` AD` marker.
fn strip_era(text: &str) -> (&str, bool) {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_suffix(" BC") {
        (rest.trim_end(), true)
    } else if let Some(rest) = trimmed.strip_suffix(" AD") {
        (rest.trim_end(), false)
    } else {
        (trimmed, false)
    }
}

fn parse_civil_date(text: &str, bc: bool, original: &str, what: &str) -> Result<i64> {
    let mut parts = text.splitn(3, '-');
    let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid(what, original));
    };
    let year: i64 = y.parse().map_err(|_| invalid(what, original))?;
    let month: u32 = m.parse().map_err(|_| invalid(what, original))?;
    let day: u32 = d.parse().map_err(|_| invalid(what, original))?;
    let year = if bc { 1 - year } else { year };
    if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
        return Err(invalid(what, original));
    }
    Ok(days_from_civil(year, month, day) - i64::from(PG_EPOCH_DAYS_FROM_UNIX))
}

pub fn parse_date(text: &str) -> Result<i32> {
    match text.trim() {
        "infinity" => return Ok(i32::MAX),
        "-infinity" => return Ok(i32::MIN),
        _ => {}
    }
    let (body, bc) = strip_era(text);
    let days = parse_civil_date(body, bc, text, "date")?;
    i32::try_from(days).map_err(|_| invalid("date", text))
}

/// Append `HH:MM:SS[.ffffff]`, trailing fraction zeros removed.
fn push_time(out: &mut String, micros: i64) {
    let hours = micros / MICROS_PER_HOUR;
    let minutes = (micros % MICROS_PER_HOUR) / MICROS_PER_MINUTE;
    let seconds = (micros % MICROS_PER_MINUTE) / MICROS_PER_SECOND;
    let fraction = micros % MICROS_PER_SECOND;
    out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
    push_fraction(out, fraction);
}

fn push_fraction(out: &mut String, fraction: i64) {
    if fraction != 0 {
        let digits = format!("{:06}", fraction);
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
}

/// Parse `SS[.ffffff]` into microseconds. Extra fraction digits are rounded.
fn parse_seconds(text: &str) -> Option<i64> {
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut micros = whole.parse::<i64>().ok()?.checked_mul(MICROS_PER_SECOND)?;
    let mut digits = fraction.bytes().map(|b| i64::from(b - b'0'));
    let mut scale = 100_000;
    while scale > 0 {
        micros += digits.next().unwrap_or(0) * scale;
        scale /= 10;
    }
    if digits.next().is_some_and(|d| d >= 5) {
        micros += 1;
    }
    Some(micros)
}

/// Parse `HH:MM[:SS[.ffffff]]` into microseconds since midnight.
fn parse_clock(text: &str) -> Option<i64> {
    let mut parts = text.splitn(3, ':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds = match parts.next() {
        Some(s) => parse_seconds(s)?,
        None => 0,
    };
    if !(0..=24).contains(&hours) || !(0..60).contains(&minutes) || seconds > 60 * MICROS_PER_SECOND {
        return None;
    }
    let micros = hours * MICROS_PER_HOUR + minutes * MICROS_PER_MINUTE + seconds;
    (micros <= MICROS_PER_DAY).then_some(micros)
}

pub fn format_time(micros: i64) -> String {
    let mut out = String::with_capacity(15);
    push_time(&mut out, micros);
    out
}

pub fn parse_time(text: &str) -> Result<i64> {
    parse_clock(text.trim()).ok_or_else(|| invalid("time", text))
}

/// Append a UTC offset as `+HH[:MM[:SS]]`.
pub fn push_offset(out: &mut String, seconds_east: i32) {
    let sign = if seconds_east < 0 { '-' } else { '+' };
    let abs = seconds_east.unsigned_abs();
    out.push(sign);
    out.push_str(&format!("{:02}", abs / 3600));
    if abs % 3600 != 0 {
        out.push_str(&format!(":{:02}", (abs % 3600) / 60));
        if abs % 60 != 0 {
            out.push_str(&format!(":{:02}", abs % 60));
        }
    }
}

/// Parse `+HH[:MM[:SS]]` or `+HHMM` into seconds east of UTC.
fn parse_offset(text: &str) -> Option<i32> {
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let fields: Vec<&str> = rest.split(':').collect();
    let (hours, minutes, seconds): (i32, i32, i32) = match fields.as_slice() {
        [hhmm] if hhmm.len() == 4 => (hhmm[..2].parse().ok()?, hhmm[2..].parse().ok()?, 0),
        [hh] => (hh.parse().ok()?, 0, 0),
        [hh, mm] => (hh.parse().ok()?, mm.parse().ok()?, 0),
        [hh, mm, ss] => (hh.parse().ok()?, mm.parse().ok()?, ss.parse().ok()?),
        _ => return None,
    };
    Some(sign * (hours * 3600 + minutes * 60 + seconds))
}

/// Split `clock` and trailing offset at the last sign character.
fn split_offset(text: &str) -> Option<(&str, i32)> {
    let pos = text.rfind(['+', '-'])?;
    let offset = parse_offset(&text[pos..])?;
    Some((text[..pos].trim_end(), offset))
}

pub fn format_timetz(micros: i64, offset: i32) -> String {
    let mut out = format_time(micros);
    push_offset(&mut out, offset);
    out
}

pub fn parse_timetz(text: &str) -> Result<(i64, i32)> {
    let (clock, offset) = split_offset(text.trim()).ok_or_else(|| invalid("timetz", text))?;
    let micros = parse_clock(clock).ok_or_else(|| invalid("timetz", text))?;
    Ok((micros, offset))
}

fn format_local(micros: i64, offset: Option<i32>) -> String {
    let days = micros.div_euclid(MICROS_PER_DAY);
    let time = micros.rem_euclid(MICROS_PER_DAY);
    let mut out = String::with_capacity(32);
    let bc = format_civil_date(&mut out, days);
    out.push(' ');
    push_time(&mut out, time);
    if let Some(offset) = offset {
        push_offset(&mut out, offset);
    }
    if bc {
        out.push_str(" BC");
    }
    out
}

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`.
pub fn format_timestamp(micros: i64) -> String {
    match micros {
        i64::MAX => "infinity".into(),
        i64::MIN => "-infinity".into(),
        _ => format_local(micros, None),
    }
}

/// Timestamp rendered in the zone `offset` seconds east of UTC.
pub fn format_timestamptz(micros: i64, offset: i32) -> String {
    match micros {
        i64::MAX => "infinity".into(),
        i64::MIN => "-infinity".into(),
        _ => format_local(micros + i64::from(offset) * MICROS_PER_SECOND, Some(offset)),
    }
}

fn parse_local(body: &str, bc: bool, original: &str, what: &str) -> Result<i64> {
    let (date, clock) = body
        .split_once([' ', 'T'])
        .map(|(d, c)| (d, c.trim()))
        .unwrap_or((body, ""));
    let days = parse_civil_date(date, bc, original, what)?;
    let time = if clock.is_empty() {
        0
    } else {
        parse_clock(clock).ok_or_else(|| invalid(what, original))?
    };
    days.checked_mul(MICROS_PER_DAY)
        .and_then(|d| d.checked_add(time))
        .ok_or_else(|| invalid(what, original))
}

pub fn parse_timestamp(text: &str) -> Result<i64> {
    match text.trim() {
        "infinity" => return Ok(i64::MAX),
        "-infinity" => return Ok(i64::MIN),
        _ => {}
    }
    let (body, bc) = strip_era(text);
    parse_local(body, bc, text, "timestamp")
}

/// Parse a timestamp with offset and normalize to UTC. A missing offset
/// means `default_offset`.
pub fn parse_timestamptz(text: &str, default_offset: i32) -> Result<i64> {
    match text.trim() {
        "infinity" => return Ok(i64::MAX),
        "-infinity" => return Ok(i64::MIN),
        _ => {}
    }
    let (body, bc) = strip_era(text);
    // The date part contains '-' too, so only look for an offset after the clock
    let (local, offset) = match body.find([' ', 'T']) {
        Some(clock_start) => {
            let (date, clock) = body.split_at(clock_start);
            match split_offset(clock) {
                Some((clock, offset)) => (format!("{}{}", date, clock), offset),
                None => (body.to_string(), default_offset),
            }
        }
        None => (body.to_string(), default_offset),
    };
    let local = local.trim_end_matches('Z');
    let micros = parse_local(local, bc, text, "timestamptz")?;
    Ok(micros - i64::from(offset) * MICROS_PER_SECOND)
}

/// ISO 8601 interval, accepted by the server under every IntervalStyle.
pub fn format_interval(interval: &Interval) -> String {
    let mut out = String::from("P");
    if interval.months != 0 {
        out.push_str(&format!("{}M", interval.months));
    }
    if interval.days != 0 {
        out.push_str(&format!("{}D", interval.days));
    }
    if interval.micros != 0 || out.len() == 1 {
        out.push('T');
        if interval.micros < 0 {
            out.push('-');
        }
        let abs = interval.micros.unsigned_abs();
        out.push_str(&(abs / MICROS_PER_SECOND as u64).to_string());
        push_fraction(&mut out, (abs % MICROS_PER_SECOND as u64) as i64);
        out.push('S');
    }
    out
}

pub fn parse_interval(text: &str, style: IntervalStyle) -> Result<Interval> {
    let trimmed = text.trim();
    let parsed = if trimmed.starts_with('P') {
        parse_iso_interval(trimmed)
    } else {
        match style {
            IntervalStyle::SqlStandard => parse_sql_interval(trimmed),
            IntervalStyle::Postgres | IntervalStyle::PostgresVerbose | IntervalStyle::Iso8601 => {
                parse_postgres_interval(trimmed)
            }
        }
    };
    parsed.ok_or_else(|| invalid("interval", text))
}

/// Split a signed decimal into its sign and unsigned text.
fn split_sign(text: &str) -> (i64, &str) {
    match text.as_bytes().first() {
        Some(b'-') => (-1, &text[1..]),
        Some(b'+') => (1, &text[1..]),
        _ => (1, text),
    }
}

fn parse_iso_interval(text: &str) -> Option<Interval> {
    let mut interval = Interval::default();
    let mut in_time = false;
    let mut number = String::new();
    for c in text.strip_prefix('P')?.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' | '.' | '-' | '+' => number.push(c),
            designator => {
                let (sign, unsigned) = split_sign(&number);
                match (designator, in_time) {
                    ('S', true) => {
                        interval.micros += sign * parse_seconds(unsigned)?;
                    }
                    _ => {
                        let n = sign * unsigned.parse::<i64>().ok()?;
                        match (designator, in_time) {
                            ('Y', false) => interval.months += i32::try_from(n * 12).ok()?,
                            ('M', false) => interval.months += i32::try_from(n).ok()?,
                            ('W', false) => interval.days += i32::try_from(n * 7).ok()?,
                            ('D', false) => interval.days += i32::try_from(n).ok()?,
                            ('H', true) => interval.micros += n * MICROS_PER_HOUR,
                            ('M', true) => interval.micros += n * MICROS_PER_MINUTE,
                            _ => return None,
                        }
                    }
                }
                number.clear();
            }
        }
    }
    number.is_empty().then_some(interval)
}

/// `[-]HH:MM[:SS[.f]]` as signed microseconds.
fn parse_signed_clock(token: &str) -> Option<i64> {
    let (sign, unsigned) = split_sign(token);
    let mut parts = unsigned.splitn(3, ':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds = match parts.next() {
        Some(s) => parse_seconds(s)?,
        None => 0,
    };
    Some(sign * (hours * MICROS_PER_HOUR + minutes * MICROS_PER_MINUTE + seconds))
}

fn parse_postgres_interval(text: &str) -> Option<Interval> {
    let body = text.strip_prefix('@').unwrap_or(text).trim();
    let (body, ago) = match body.strip_suffix("ago") {
        Some(rest) => (rest.trim_end(), true),
        None => (body, false),
    };

    let mut interval = Interval::default();
    let mut tokens = body.split_whitespace();
    while let Some(token) = tokens.next() {
        if token.contains(':') {
            interval.micros += parse_signed_clock(token)?;
            continue;
        }
        let unit = tokens.next()?.to_ascii_lowercase();
        let unit = unit.trim_end_matches('s');
        if matches!(unit, "sec" | "second") {
            let (sign, unsigned) = split_sign(token);
            interval.micros += sign * parse_seconds(unsigned)?;
            continue;
        }
        let n: i64 = token.parse().ok()?;
        match unit {
            "millennium" | "millennia" => interval.months += i32::try_from(n * 12_000).ok()?,
            "century" | "centurie" => interval.months += i32::try_from(n * 1200).ok()?,
            "decade" => interval.months += i32::try_from(n * 120).ok()?,
            "year" | "yr" => interval.months += i32::try_from(n * 12).ok()?,
            "mon" | "month" => interval.months += i32::try_from(n).ok()?,
            "week" => interval.days += i32::try_from(n * 7).ok()?,
            "day" => interval.days += i32::try_from(n).ok()?,
            "hour" | "hr" => interval.micros += n * MICROS_PER_HOUR,
            "min" | "minute" => interval.micros += n * MICROS_PER_MINUTE,
            "millisecond" | "m" => interval.micros += n * 1000,
            "microsecond" | "u" => interval.micros += n,
            _ => return None,
        }
    }

    if ago {
        interval.months = -interval.months;
        interval.days = -interval.days;
        interval.micros = -interval.micros;
    }
    Some(interval)
}

/// `[+-]Y-M [+-]D [+-]H:M:S`; a leading minus on the first field with no
/// other signs applies to every field.
fn parse_sql_interval(text: &str) -> Option<Interval> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let global_negative = tokens.first().is_some_and(|t| t.starts_with('-'))
        && tokens.iter().skip(1).all(|t| !t.starts_with(['-', '+']));

    let mut interval = Interval::default();
    for token in &tokens {
        let token = if global_negative {
            token.trim_start_matches('-')
        } else {
            token
        };
        if token.contains(':') {
            interval.micros += parse_signed_clock(token)?;
        } else if let Some((years, months)) = split_sign(token).1.split_once('-') {
            let (sign, _) = split_sign(token);
            let total = years.parse::<i64>().ok()? * 12 + months.parse::<i64>().ok()?;
            interval.months += i32::try_from(sign * total).ok()?;
        } else {
            interval.days += token.parse::<i32>().ok()?;
        }
    }
    if global_negative {
        interval.months = -interval.months;
        interval.days = -interval.days;
        interval.micros = -interval.micros;
    }
    Some(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_dates() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2000, 1, 1), 10_957);
        assert_eq!(civil_from_days(10_957), (2000, 1, 1));
        assert_eq!(civil_from_days(-1), (1969, 12, 31));
        assert_eq!(civil_from_days(days_from_civil(2024, 2, 29)), (2024, 2, 29));
    }

    #[test]
    fn dates() {
        assert_eq!(format_date(0), "2000-01-01");
        assert_eq!(parse_date("2000-01-01").unwrap(), 0);
        assert_eq!(parse_date("1999-12-31").unwrap(), -1);
        assert_eq!(format_date(i32::MAX), "infinity");
        assert_eq!(parse_date("-infinity").unwrap(), i32::MIN);
        let bc = parse_date("0044-03-15 BC").unwrap();
        assert_eq!(format_date(bc), "0044-03-15 BC");
        assert!(parse_date("2023-02-29").is_err());
    }

    #[test]
    fn times() {
        let micros = 13 * MICROS_PER_HOUR + 5 * MICROS_PER_MINUTE + 7 * MICROS_PER_SECOND + 250_000;
        assert_eq!(format_time(micros), "13:05:07.25");
        assert_eq!(parse_time("13:05:07.25").unwrap(), micros);
        assert_eq!(parse_time("24:00:00").unwrap(), MICROS_PER_DAY);
        assert_eq!(parse_time("00:00:00.0000004").unwrap(), 0);
        assert!(parse_time("25:00:00").is_err());

        assert_eq!(format_timetz(0, 5 * 3600 + 30 * 60), "00:00:00+05:30");
        assert_eq!(parse_timetz("12:00:00-08").unwrap(), (12 * MICROS_PER_HOUR, -8 * 3600));
    }

    #[test]
    fn timestamps() {
        let micros = MICROS_PER_DAY + 90 * MICROS_PER_SECOND;
        assert_eq!(format_timestamp(micros), "2000-01-02 00:01:30");
        assert_eq!(parse_timestamp("2000-01-02 00:01:30").unwrap(), micros);
        assert_eq!(parse_timestamp("2000-01-02T00:01:30").unwrap(), micros);
        assert_eq!(format_timestamp(-1), "1999-12-31 23:59:59.999999");
        assert_eq!(parse_timestamp("1999-12-31 23:59:59.999999").unwrap(), -1);
    }

    #[test]
    fn timestamps_with_zone() {
        assert_eq!(format_timestamptz(0, 0), "2000-01-01 00:00:00+00");
        assert_eq!(format_timestamptz(0, -5 * 3600), "1999-12-31 19:00:00-05");
        assert_eq!(parse_timestamptz("1999-12-31 19:00:00-05", 0).unwrap(), 0);
        assert_eq!(parse_timestamptz("2000-01-01 05:30:00+05:30", 0).unwrap(), 0);
        assert_eq!(parse_timestamptz("2000-01-01 01:00:00", 3600).unwrap(), 0);
    }

    #[test]
    fn intervals_in_every_style() {
        let expected = Interval {
            months: 14,
            days: 3,
            micros: 4 * MICROS_PER_HOUR + 5 * MICROS_PER_MINUTE + 6 * MICROS_PER_SECOND + 500_000,
        };
        let postgres = parse_interval("1 year 2 mons 3 days 04:05:06.5", IntervalStyle::Postgres);
        assert_eq!(postgres.unwrap(), expected);
        let verbose = parse_interval(
            "@ 1 year 2 mons 3 days 4 hours 5 mins 6.5 secs",
            IntervalStyle::PostgresVerbose,
        );
        assert_eq!(verbose.unwrap(), expected);
        let iso = parse_interval("P1Y2M3DT4H5M6.5S", IntervalStyle::Iso8601);
        assert_eq!(iso.unwrap(), expected);
        let sql = parse_interval("+1-2 +3 +4:05:06.5", IntervalStyle::SqlStandard);
        assert_eq!(sql.unwrap(), expected);
    }

    #[test]
    fn negative_intervals() {
        let ago = parse_interval("@ 1 day 2 hours ago", IntervalStyle::PostgresVerbose).unwrap();
        assert_eq!(ago, Interval { months: 0, days: -1, micros: -2 * MICROS_PER_HOUR });
        let mixed = parse_interval("-1 days +02:00:00", IntervalStyle::Postgres).unwrap();
        assert_eq!(mixed, Interval { months: 0, days: -1, micros: 2 * MICROS_PER_HOUR });
        let sql = parse_interval("-1-2 3", IntervalStyle::SqlStandard).unwrap();
        assert_eq!(sql, Interval { months: -14, days: -3, micros: 0 });
    }

    #[test]
    fn interval_output_parses_back() {
        for interval in [
            Interval::default(),
            Interval { months: -5, days: 10, micros: -1_500_000 },
            Interval { months: 0, days: 0, micros: 3_723_000_001 },
        ] {
            let text = format_interval(&interval);
            assert_eq!(parse_interval(&text, IntervalStyle::Postgres).unwrap(), interval, "{}", text);
        }
        assert_eq!(format_interval(&Interval::default()), "PT0S");
    }
}
