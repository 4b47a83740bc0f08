//! Publication date normalization.
//!
//! Feeds disagree on how to spell a date, so a fixed list of layouts is tried in order and the
//! first one that parses wins. The order is part of the contract: an input that happens to fit
//! several layouts always resolves through the same one.

use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::parsing::Parsed;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::trace;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unable to parse date: `{0}`")]
pub struct UnparseableTimestamp(pub String);

#[derive(Debug, Clone, Copy)]
enum Zone {
    /// The offset is part of the format description.
    Numeric,

    /// A zone abbreviation at the given position among the space-separated tokens.
    Named { token: usize },
}

#[derive(Debug, Clone, Copy)]
enum Format {
    /// Fractional seconds are optional.
    Rfc3339,

    Description {
        items: &'static [BorrowedFormatItem<'static>],
        zone: Zone,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub name: &'static str,
    format: Format,
}

pub static LAYOUTS: &[Layout] = &[
    Layout {
        name: "RFC 1123Z",
        format: Format::Description {
            items: format_description!(
                "[weekday repr:short], [day] [month repr:short] [year] \
                    [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
            ),
            zone: Zone::Numeric,
        },
    },
    Layout {
        name: "RFC 3339",
        format: Format::Rfc3339,
    },
    Layout {
        name: "Unix date",
        format: Format::Description {
            items: format_description!(
                "[weekday repr:short] [month repr:short] [day padding:none] \
                    [hour]:[minute]:[second] [year]"
            ),
            zone: Zone::Named { token: 4 },
        },
    },
    Layout {
        name: "Ruby date",
        format: Format::Description {
            items: format_description!(
                "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] \
                    [offset_hour sign:mandatory][offset_minute] [year]"
            ),
            zone: Zone::Numeric,
        },
    },
    Layout {
        name: "RFC 822",
        format: Format::Description {
            items: format_description!(
                "[day] [month repr:short] [year repr:last_two] [hour]:[minute]"
            ),
            zone: Zone::Named { token: 4 },
        },
    },
    Layout {
        name: "RFC 822Z",
        format: Format::Description {
            items: format_description!(
                "[day] [month repr:short] [year repr:last_two] [hour]:[minute] \
                    [offset_hour sign:mandatory][offset_minute]"
            ),
            zone: Zone::Numeric,
        },
    },
    Layout {
        name: "RFC 850",
        format: Format::Description {
            items: format_description!(
                "[weekday], [day]-[month repr:short]-[year repr:last_two] \
                    [hour]:[minute]:[second]"
            ),
            zone: Zone::Named { token: 3 },
        },
    },
    Layout {
        name: "RFC 1123",
        format: Format::Description {
            items: format_description!(
                "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second]"
            ),
            zone: Zone::Named { token: 5 },
        },
    },
];

impl Layout {
    /// Expects whitespace-normalized input.
    fn parse(&self, s: &str) -> Option<OffsetDateTime> {
        match self.format {
            Format::Rfc3339 => OffsetDateTime::parse(s, &Rfc3339).ok(),

            Format::Description {
                items,
                zone: Zone::Numeric,
            } => OffsetDateTime::try_from(parse_items(s, items)?).ok(),

            Format::Description {
                items,
                zone: Zone::Named { token },
            } => {
                let mut tokens = s.split(' ').collect::<Vec<_>>();

                if token >= tokens.len() {
                    return None;
                }

                let offset = zone_offset(tokens.remove(token))?;
                let parsed = parse_items(&tokens.join(" "), items)?;

                PrimitiveDateTime::try_from(parsed)
                    .ok()
                    .map(|dt| dt.assume_offset(offset))
            }
        }
    }
}

fn parse_items(s: &str, items: &[BorrowedFormatItem<'_>]) -> Option<Parsed> {
    let mut parsed = Parsed::new();
    let rest = parsed.parse_items(s.as_bytes(), items).ok()?;

    if !rest.is_empty() {
        return None;
    }

    if parsed.year().is_none() {
        if let Some(last_two) = parsed.year_last_two() {
            let century = if last_two >= 69 { 1900 } else { 2000 };
            parsed.set_year(century + i32::from(last_two))?;
        }
    }

    Some(parsed)
}

/// Resolves a zone abbreviation using the RFC 822 table; unknown abbreviations are taken as UTC.
/// Apart from `UT`, an abbreviation has three to five letters.
fn zone_offset(abbrev: &str) -> Option<UtcOffset> {
    let plausible = abbrev == "UT"
        || (3..=5).contains(&abbrev.len()) && abbrev.bytes().all(|b| b.is_ascii_alphabetic());

    if !plausible {
        return None;
    }

    let hours = match abbrev {
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" => -8,
        _ => 0,
    };

    UtcOffset::from_hms(hours, 0, 0).ok()
}

/// Parses `s` with the first layout that accepts it and returns the instant in UTC.
///
/// Instants whose UTC date falls outside the years 0 through 9999 are rejected, so the result
/// always has a four-digit year.
pub fn normalize(s: &str) -> Result<OffsetDateTime, UnparseableTimestamp> {
    let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");

    if !normalized.is_empty() {
        for layout in LAYOUTS {
            let Some(result) = layout.parse(&normalized) else {
                continue;
            };

            trace!(layout = layout.name, %result, "Parsed a timestamp");

            return result
                .checked_to_offset(UtcOffset::UTC)
                .filter(|utc| (0..=9999).contains(&utc.year()))
                .ok_or_else(|| UnparseableTimestamp(s.into()));
        }
    }

    Err(UnparseableTimestamp(s.into()))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn layout_names(s: &str) -> Vec<&'static str> {
        LAYOUTS
            .iter()
            .filter(|layout| layout.parse(s).is_some())
            .map(|layout| layout.name)
            .collect()
    }

    #[test]
    fn parses_every_layout() {
        let cases = [
            ("Mon, 02 Jan 2006 15:04:05 -0700", "RFC 1123Z", datetime!(2006-01-02 15:04:05 -7)),
            ("2006-01-02T15:04:05Z", "RFC 3339", datetime!(2006-01-02 15:04:05 UTC)),
            (
                "2006-01-02T15:04:05.999999999+02:00",
                "RFC 3339",
                datetime!(2006-01-02 15:04:05.999999999 +2),
            ),
            ("Mon Jan 2 15:04:05 MST 2006", "Unix date", datetime!(2006-01-02 15:04:05 -7)),
            ("Mon Jan 02 15:04:05 -0700 2006", "Ruby date", datetime!(2006-01-02 15:04:05 -7)),
            ("02 Jan 06 15:04 GMT", "RFC 822", datetime!(2006-01-02 15:04 UTC)),
            ("02 Jan 06 15:04 -0700", "RFC 822Z", datetime!(2006-01-02 15:04 -7)),
            ("Monday, 02-Jan-06 15:04:05 EST", "RFC 850", datetime!(2006-01-02 15:04:05 -5)),
            ("Mon, 02 Jan 2006 15:04:05 GMT", "RFC 1123", datetime!(2006-01-02 15:04:05 UTC)),
        ];

        for (s, layout, expected) in cases {
            assert_eq!(normalize(s), Ok(expected), "{s}");
            assert_eq!(layout_names(s).first().copied(), Some(layout), "{s}");
        }
    }

    #[test]
    fn first_matching_layout_wins() {
        for s in [
            "Mon, 02 Jan 2006 15:04:05 -0700",
            "Mon Jan 2 15:04:05 PST 2006",
            "02 Jan 06 15:04 UT",
        ] {
            let first = LAYOUTS.iter().find_map(|layout| layout.parse(s));

            assert_eq!(normalize(s).ok(), first);
            assert_eq!(normalize(s), normalize(s));
        }
    }

    #[test]
    fn empty_input_fails() {
        assert_eq!(normalize(""), Err(UnparseableTimestamp("".into())));
        assert!(normalize(" \n\t ").is_err());
    }

    #[test]
    fn garbage_fails() {
        assert!(normalize("yesterday").is_err());
        assert!(normalize("2006-01-02").is_err());
        assert!(normalize("Mon, 02 Jan 2006 15:04:05 -0700 trailing").is_err());
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(
            normalize("\n    Mon, 02 Jan 2006 15:04:05 +0000\n  "),
            Ok(datetime!(2006-01-02 15:04:05 UTC)),
        );
        assert_eq!(
            normalize("Mon Jan  2 15:04:05 UTC 2006"),
            Ok(datetime!(2006-01-02 15:04:05 UTC)),
        );
    }

    #[test]
    fn two_digit_years_pivot_at_69() {
        assert_eq!(normalize("01 Jan 69 00:00 GMT"), Ok(datetime!(1969-01-01 00:00 UTC)));
        assert_eq!(normalize("01 Jan 68 00:00 GMT"), Ok(datetime!(2068-01-01 00:00 UTC)));
    }

    #[test]
    fn unknown_zone_abbreviations_are_utc() {
        assert_eq!(
            normalize("Mon, 02 Jan 2006 15:04:05 XYZ"),
            Ok(datetime!(2006-01-02 15:04:05 UTC)),
        );
    }

    #[test]
    fn short_zone_tokens_are_rejected() {
        assert!(normalize("Mon, 02 Jan 2006 15:04:05 A").is_err());
        assert!(normalize("Mon Jan 2 15:04:05 Z 2006").is_err());
        assert_eq!(normalize("02 Jan 06 15:04 UT"), Ok(datetime!(2006-01-02 15:04 UTC)));
    }

    #[test]
    fn results_are_utc() {
        let parsed = normalize("Mon, 02 Jan 2006 15:04:05 -0700").unwrap();

        assert_eq!(parsed.offset(), UtcOffset::UTC);
        assert_eq!(parsed, datetime!(2006-01-02 22:04:05 UTC));
    }

    #[test]
    fn dates_beyond_the_utc_range_fail() {
        for s in [
            "9999-12-31T23:59:59-23:00",
            "Fri Dec 31 23:59:59 -2300 9999",
            "Fri, 31 Dec 9999 23:59:59 -2300",
            "Sat, 01 Jan 0000 00:00:00 +0100",
        ] {
            assert_eq!(normalize(s), Err(UnparseableTimestamp(s.into())), "{s}");
        }

        assert_eq!(
            normalize("9999-12-31T23:59:59Z"),
            Ok(datetime!(9999-12-31 23:59:59 UTC)),
        );
    }

    #[test]
    fn same_instant_across_offsets() {
        let a = normalize("Mon, 02 Jan 2006 15:04:05 -0700").unwrap();
        let b = normalize("2006-01-02T22:04:05Z").unwrap();

        assert_eq!(a, b);
    }
}
