use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::{Regex, RegexBuilder};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A duration written as `1d2h3m4s500ms`, with every part optional but at least one present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration(std::time::Duration);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseDurationError {
    #[error("`{0}` is not a duration (expected something like `1h30m` or `45s`)")]
    Malformed(String),

    #[error("duration `{0}` is too large")]
    TooLarge(String),
}

impl Duration {
    pub fn from_secs(seconds: u64) -> Self {
        Self(std::time::Duration::from_secs(seconds))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Duration {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static REGEXP: OnceLock<Regex> = OnceLock::new();

        let regexp = REGEXP.get_or_init(|| {
            RegexBuilder::new(
                r"
                ^
                (?:(?<days>    \d+)d)?  \s*
                (?:(?<hours>   \d+)h)?  \s*
                (?:(?<minutes> \d+)m)?  \s*
                (?:(?<seconds> \d+)s)?  \s*
                (?:(?<millis>  \d+)ms)?
                $",
            )
            .ignore_whitespace(true)
            .build()
            .unwrap()
        });
        let Some(captures) = regexp.captures(s) else {
            return Err(ParseDurationError::Malformed(s.into()));
        };

        let parse = |name: &str| match captures.name(name).map(|m| m.as_str()) {
            Some(v) => v
                .parse::<u64>()
                .map(Some)
                .map_err(|_| ParseDurationError::TooLarge(s.into())),
            None => Ok(None),
        };

        let days = parse("days")?;
        let hours = parse("hours")?;
        let minutes = parse("minutes")?;
        let seconds = parse("seconds")?;
        let millis = parse("millis")?;

        if days.is_none()
            && hours.is_none()
            && minutes.is_none()
            && seconds.is_none()
            && millis.is_none()
        {
            return Err(ParseDurationError::Malformed(s.into()));
        }

        let secs = days
            .unwrap_or(0)
            .checked_mul(24)
            .and_then(|h| h.checked_add(hours.unwrap_or(0)))
            .and_then(|h| h.checked_mul(60))
            .and_then(|m| m.checked_add(minutes.unwrap_or(0)))
            .and_then(|m| m.checked_mul(60))
            .and_then(|s| s.checked_add(seconds.unwrap_or(0)))
            .ok_or_else(|| ParseDurationError::TooLarge(s.into()))?;

        std::time::Duration::from_secs(secs)
            .checked_add(std::time::Duration::from_millis(millis.unwrap_or(0)))
            .map(Duration)
            .ok_or_else(|| ParseDurationError::TooLarge(s.into()))
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.subsec_millis();
        let mut secs = self.0.as_secs();

        if secs == 0 && millis == 0 {
            return write!(f, "0s");
        }

        for (unit, size) in [("d", 86400), ("h", 3600), ("m", 60), ("s", 1)] {
            if secs >= size {
                write!(f, "{}{unit}", secs / size)?;
                secs %= size;
            }
        }

        if millis > 0 {
            write!(f, "{millis}ms")?;
        }

        Ok(())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a duration")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_u64(v.try_into().map_err(E::custom)?)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Duration::from_secs(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

impl Serialize for Duration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(duration: std::time::Duration) -> Self {
        Self(duration)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(duration: Duration) -> Self {
        duration.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_durations() {
        assert_eq!("45s".parse(), Ok(Duration::from_secs(45)));
        assert_eq!("1m".parse(), Ok(Duration::from_secs(60)));
        assert_eq!("1m0s".parse(), Ok(Duration::from_secs(60)));
        assert_eq!("1h 30m".parse(), Ok(Duration::from_secs(5400)));
        assert_eq!("1d2h3m4s".parse(), Ok(Duration::from_secs(93784)));
        assert_eq!(
            "500ms".parse(),
            Ok(Duration::from(std::time::Duration::from_millis(500))),
        );
    }

    #[test]
    fn rejects_malformed_durations() {
        for s in ["", "1", "10x", "-1m", "m", "1.5s"] {
            assert!(s.parse::<Duration>().is_err(), "{s}");
        }
    }

    #[test]
    fn displays_in_parseable_form() {
        for s in ["0s", "45s", "1m", "1h30m", "1d2h3m4s", "2s250ms"] {
            let duration: Duration = s.parse().unwrap();

            assert_eq!(duration.to_string(), s);
        }
    }
}
