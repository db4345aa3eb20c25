//! Per-connection environment threaded through every encode and decode.
//!
//! The server reports session settings through ParameterStatus messages;
//! [`Context::update_system_parameter`] folds each report in. Values that
//! cannot be mapped fall back to ISO formats, UTC or the C locale and log a
//! warning. Updates never fail.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::protocol::types::Oid;
use crate::server::Version;
use crate::types::TypeRef;
use crate::types::shared::SharedRegistry;

/// Context shared between a connection and its transport task.
pub type SharedContext = Arc<RwLock<Context>>;

/// Session time zone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimeZone {
    #[default]
    Utc,
    /// Seconds east of UTC
    Fixed(i32),
    /// Region name whose offset is not known locally; treated as UTC
    Named(String),
}

impl TimeZone {
    /// Parse a `TimeZone` setting. Returns `None` for names with no fixed offset.
    ///
    /// PostgreSQL spells offsets POSIX-style (`Etc/GMT+5` is five hours
    /// *west*), so the sign is flipped.
    pub fn parse(value: &str) -> Option<TimeZone> {
        let value = value.trim();
        if matches!(
            value,
            "UTC" | "Etc/UTC" | "GMT" | "Etc/GMT" | "Z" | "Zulu" | "UCT" | "Universal" | "Etc/Universal"
        ) {
            return Some(TimeZone::Utc);
        }

        // "<+05>-05" is how a numeric SET TIME ZONE is reported back
        let posix = match value.rfind('>') {
            Some(end) if value.starts_with('<') => &value[end + 1..],
            _ => ["Etc/GMT", "GMT", "UTC"]
                .iter()
                .find_map(|prefix| value.strip_prefix(prefix))
                .unwrap_or(value),
        };

        let flipped: String = if posix.contains('+') {
            posix.replace('+', "-")
        } else {
            posix.replace('-', "+")
        };
        parse_offset(&flipped).map(|secs| {
            if secs == 0 {
                TimeZone::Utc
            } else {
                TimeZone::Fixed(secs)
            }
        })
    }

    /// Offset from UTC in seconds; named zones count as UTC.
    pub fn offset_seconds(&self) -> i32 {
        match self {
            TimeZone::Fixed(secs) => *secs,
            TimeZone::Utc | TimeZone::Named(_) => 0,
        }
    }
}

/// Parse `+HH[:MM[:SS]]`, `-HH`, `+HHMM`. A missing sign means east.
fn parse_offset(s: &str) -> Option<i32> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        b'0'..=b'9' => (1, s),
        _ => return None,
    };
    let mut parts = rest.split(':');
    let hours_part = parts.next()?;
    let (hours, minutes_inline) = if hours_part.len() == 4 && !rest.contains(':') {
        (
            hours_part.get(..2)?.parse::<i32>().ok()?,
            hours_part.get(2..)?.parse::<i32>().ok()?,
        )
    } else {
        (hours_part.parse::<i32>().ok()?, 0)
    };
    let minutes = match parts.next() {
        Some(m) => m.parse::<i32>().ok()?,
        None => minutes_inline,
    };
    let seconds = match parts.next() {
        Some(sec) => sec.parse::<i32>().ok()?,
        None => 0,
    };
    if hours > 15 || minutes > 59 || seconds > 59 {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60 + seconds))
}

/// Output half of the `DateStyle` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateOutput {
    #[default]
    Iso,
    Sql,
    Postgres,
    German,
}

/// Field-order half of the `DateStyle` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateOrder {
    Dmy,
    #[default]
    Mdy,
    Ymd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateStyle {
    pub output: DateOutput,
    pub order: DateOrder,
}

impl DateStyle {
    /// Parse `ISO, MDY` and similar. `None` if no output style is recognized.
    pub fn parse(value: &str) -> Option<DateStyle> {
        let mut output = None;
        let mut order = DateOrder::default();
        for part in value.split(',').map(str::trim) {
            match part.to_ascii_uppercase().as_str() {
                "ISO" => output = Some(DateOutput::Iso),
                "SQL" => output = Some(DateOutput::Sql),
                "POSTGRES" => output = Some(DateOutput::Postgres),
                "GERMAN" => output = Some(DateOutput::German),
                "DMY" | "EURO" | "EUROPEAN" => order = DateOrder::Dmy,
                "MDY" | "US" | "NONEURO" | "NONEUROPEAN" => order = DateOrder::Mdy,
                "YMD" => order = DateOrder::Ymd,
                _ => return None,
            }
        }
        output.map(|output| DateStyle { output, order })
    }
}

/// `IntervalStyle` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntervalStyle {
    #[default]
    Postgres,
    PostgresVerbose,
    SqlStandard,
    Iso8601,
}

impl IntervalStyle {
    pub fn parse(value: &str) -> Option<IntervalStyle> {
        Some(match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => IntervalStyle::Postgres,
            "postgres_verbose" => IntervalStyle::PostgresVerbose,
            "sql_standard" => IntervalStyle::SqlStandard,
            "iso_8601" => IntervalStyle::Iso8601,
            _ => return None,
        })
    }
}

/// Number formatting of the server's `lc_monetary` locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonetaryLocale {
    /// Locale name as reported, `C` for the root locale
    pub name: String,
    pub decimal_separator: char,
    pub group_separator: char,
}

impl Default for MonetaryLocale {
    fn default() -> Self {
        Self {
            name: "C".into(),
            decimal_separator: '.',
            group_separator: ',',
        }
    }
}

impl MonetaryLocale {
    /// Parse `en_US.UTF-8`, `de_DE`, `C` or `POSIX`.
    pub fn parse(locale: &str) -> Option<MonetaryLocale> {
        let locale = locale.trim();
        if locale == "C" || locale == "POSIX" || locale.starts_with("C.") {
            return Some(MonetaryLocale::default());
        }
        let language = locale.split(['_', '.', '-', '@']).next()?;
        if language.len() < 2 || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let comma_decimal = matches!(
            language.to_ascii_lowercase().as_str(),
            "de" | "fr" | "es" | "it" | "nl" | "pt" | "ru" | "pl" | "cs" | "sv" | "da" | "nb"
                | "fi" | "tr" | "el" | "hu" | "ro" | "uk" | "id"
        );
        let (decimal_separator, group_separator) = if comma_decimal {
            (',', '.')
        } else {
            ('.', ',')
        };
        Some(MonetaryLocale {
            name: locale.to_string(),
            decimal_separator,
            group_separator,
        })
    }
}

/// Per-connection codec environment.
#[derive(Debug, Clone)]
pub struct Context {
    registry: Arc<SharedRegistry>,
    pub client_encoding: String,
    pub time_zone: TimeZone,
    pub date_style: DateStyle,
    pub interval_style: IntervalStyle,
    pub standard_conforming_strings: bool,
    pub integer_datetimes: bool,
    pub session_user: Option<String>,
    pub application_name: Option<String>,
    pub monetary_locale: MonetaryLocale,
    pub server_version: Option<Version>,
}

impl Context {
    pub fn new(registry: Arc<SharedRegistry>) -> Self {
        Self {
            registry,
            client_encoding: "UTF8".into(),
            time_zone: TimeZone::Utc,
            date_style: DateStyle::default(),
            interval_style: IntervalStyle::default(),
            standard_conforming_strings: true,
            integer_datetimes: true,
            session_user: None,
            application_name: None,
            monetary_locale: MonetaryLocale::default(),
            server_version: None,
        }
    }

    pub fn registry(&self) -> &Arc<SharedRegistry> {
        &self.registry
    }

    /// Cached type for `oid`. Never queries the server.
    pub fn cached_type(&self, oid: Oid) -> Option<TypeRef> {
        self.registry.get(oid)
    }

    /// Fold one reported server setting into the context.
    pub fn update_system_parameter(&mut self, name: &str, value: &str) {
        debug!("system parameter: {}={}", name, value);

        match name {
            "server_version" => match Version::parse(value) {
                Ok(version) => self.server_version = Some(version),
                Err(_) => warn!("Invalid server_version {:?}", value),
            },
            "DateStyle" => match DateStyle::parse(value) {
                Some(style) if style.output == DateOutput::Iso => self.date_style = style,
                Some(style) => {
                    warn!("Unsupported DateStyle {:?}, reverting to ISO", value);
                    self.date_style = DateStyle {
                        output: DateOutput::Iso,
                        order: style.order,
                    };
                }
                None => {
                    warn!("Invalid DateStyle {:?}, reverting to ISO", value);
                    self.date_style = DateStyle::default();
                }
            },
            "IntervalStyle" => {
                self.interval_style = IntervalStyle::parse(value).unwrap_or_else(|| {
                    warn!("Unknown IntervalStyle {:?}, reverting to postgres", value);
                    IntervalStyle::Postgres
                });
            }
            "TimeZone" => {
                self.time_zone = TimeZone::parse(value).unwrap_or_else(|| {
                    warn!("Time zone {:?} has no fixed offset, using UTC", value);
                    TimeZone::Named(value.to_string())
                });
            }
            "integer_datetimes" => self.integer_datetimes = value == "on",
            "client_encoding" => {
                if !value.eq_ignore_ascii_case("UTF8") && !value.eq_ignore_ascii_case("UNICODE") {
                    warn!("client_encoding {:?} is not UTF8, text is still decoded as UTF-8", value);
                }
                self.client_encoding = value.to_string();
            }
            "standard_conforming_strings" => self.standard_conforming_strings = value == "on",
            "session_authorization" => self.session_user = Some(value.to_string()),
            "application_name" => self.application_name = Some(value.to_string()),
            _ => {}
        }
    }

    /// Apply the server's `lc_monetary` setting.
    pub fn set_monetary_locale(&mut self, locale: &str) {
        self.monetary_locale = MonetaryLocale::parse(locale).unwrap_or_else(|| {
            warn!("Locale {:?} could not be mapped, using the C locale", locale);
            MonetaryLocale::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        Context::new(Arc::new(SharedRegistry::new()))
    }

    #[test]
    fn time_zones() {
        assert_eq!(TimeZone::parse("UTC"), Some(TimeZone::Utc));
        assert_eq!(TimeZone::parse("Etc/GMT+5"), Some(TimeZone::Fixed(-5 * 3600)));
        assert_eq!(TimeZone::parse("Etc/GMT-3"), Some(TimeZone::Fixed(3 * 3600)));
        assert_eq!(TimeZone::parse("<+05:30>-05:30"), Some(TimeZone::Fixed(19_800)));
        assert_eq!(TimeZone::parse("America/New_York"), None);
        assert_eq!(TimeZone::parse("+0530"), Some(TimeZone::Fixed(-19_800)));
    }

    #[test]
    fn multibyte_offsets_are_rejected() {
        assert_eq!(TimeZone::parse("1é1"), None);
        assert_eq!(TimeZone::parse("+1é1"), None);
        assert_eq!(TimeZone::parse("<+05>1é1"), None);

        let mut ctx = context();
        ctx.update_system_parameter("TimeZone", "-1é1");
        assert_eq!(ctx.time_zone.offset_seconds(), 0);
    }

    #[test]
    fn date_styles() {
        let style = DateStyle::parse("ISO, DMY").unwrap();
        assert_eq!(style.output, DateOutput::Iso);
        assert_eq!(style.order, DateOrder::Dmy);
        assert!(DateStyle::parse("Nonsense").is_none());
    }

    #[test]
    fn parameter_updates_never_fail() {
        let mut ctx = context();
        ctx.update_system_parameter("TimeZone", "Europe/Berlin");
        assert_eq!(ctx.time_zone, TimeZone::Named("Europe/Berlin".into()));
        assert_eq!(ctx.time_zone.offset_seconds(), 0);

        ctx.update_system_parameter("DateStyle", "SQL, DMY");
        assert_eq!(ctx.date_style.output, DateOutput::Iso);
        assert_eq!(ctx.date_style.order, DateOrder::Dmy);

        ctx.update_system_parameter("DateStyle", "garbage");
        assert_eq!(ctx.date_style, DateStyle::default());

        ctx.update_system_parameter("IntervalStyle", "iso_8601");
        assert_eq!(ctx.interval_style, IntervalStyle::Iso8601);
        ctx.update_system_parameter("IntervalStyle", "klingon");
        assert_eq!(ctx.interval_style, IntervalStyle::Postgres);

        ctx.update_system_parameter("standard_conforming_strings", "off");
        assert!(!ctx.standard_conforming_strings);
        ctx.update_system_parameter("session_authorization", "alice");
        assert_eq!(ctx.session_user.as_deref(), Some("alice"));
        ctx.update_system_parameter("server_version", "16.1");
        assert_eq!(ctx.server_version.as_ref().map(|v| v.major), Some(16));
        ctx.update_system_parameter("server_version", "???");
        assert_eq!(ctx.server_version.as_ref().map(|v| v.major), Some(16));
    }

    #[test]
    fn monetary_locales() {
        let mut ctx = context();
        ctx.set_monetary_locale("de_DE.UTF-8");
        assert_eq!(ctx.monetary_locale.decimal_separator, ',');
        ctx.set_monetary_locale("en_US.utf8");
        assert_eq!(ctx.monetary_locale.decimal_separator, '.');
        ctx.set_monetary_locale("");
        assert_eq!(ctx.monetary_locale, MonetaryLocale::default());
    }
}
