//! Handset alarms (`AT+CALA`)

use chrono::{Datelike, NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Day value meaning "every day"
pub const ALL_DAYS: u8 = 0;

/// Valid explicit recurrence days (Monday = 1 .. Sunday = 7)
pub const WEEK_DAYS: RangeInclusive<u8> = 1..=7;

// "[yy/MM/dd,]HH:mm[:ss][+zz]",n[,type,"text"[,"recurr" | recurr]]
static ALARM_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:\+CALA:\s*)?"(?:(\d{2,4})/(\d{1,2})/(\d{1,2}),)?(\d{1,2}):(\d{1,2})(?::(\d{1,2}))?(?:[+-]\d{1,2})?"\s*,\s*(\d+)(?:\s*,\s*\d*\s*,\s*(?:"[^"]*")?(?:\s*,\s*(?:"([^"]*)"|([0-7](?:\s*,\s*[0-7])*)))?)?"#,
    )
    .expect("alarm regex")
});

static ALARM_SLOTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+CALA:\s*\((\d+)(?:-(\d+))?\)").expect("alarm slots regex"));

/// Alarm construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlarmError {
    /// Day outside 1..=7
    #[error("invalid recurrence day {0}")]
    InvalidDay(u8),
}

/// Two-digit years below 80 are 20xx, the rest 19xx
pub fn normalize_year(year: i32) -> i32 {
    match year {
        0..=79 => 2000 + year,
        80..=99 => 1900 + year,
        _ => year,
    }
}

/// One alarm slot on the handset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneAlarm {
    /// Time of day
    pub time: NaiveTime,
    /// Optional calendar date
    pub date: Option<NaiveDate>,
    /// Rings once at `date` + `time`
    pub one_time: bool,
    /// Rings every day
    pub for_all_days: bool,
    /// Explicit recurrence days, set only when neither flag above is
    pub days: Option<BTreeSet<u8>>,
    /// Alarm index
    pub number: u32,
}

impl PhoneAlarm {
    /// Alarm ringing once
    pub fn one_time(number: u32, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            time,
            date: Some(date),
            one_time: true,
            for_all_days: false,
            days: None,
            number,
        }
    }

    /// Recurring alarm. `None`, an empty set or a set containing
    /// [`ALL_DAYS`] rings every day.
    pub fn recurring(
        number: u32,
        time: NaiveTime,
        days: Option<BTreeSet<u8>>,
    ) -> Result<Self, AlarmError> {
        let days = match days {
            Some(days) if !days.is_empty() && !days.contains(&ALL_DAYS) => {
                if let Some(bad) = days.iter().find(|d| !WEEK_DAYS.contains(*d)) {
                    return Err(AlarmError::InvalidDay(*bad));
                }
                Some(days)
            }
            _ => None,
        };
        Ok(Self {
            time,
            date: None,
            one_time: false,
            for_all_days: days.is_none(),
            days,
            number,
        })
    }

    /// Build from textual fields: date `yy/MM/dd`, time `HH:mm[:ss]`, days
    /// a comma list such as `1,3,5` (`None` or `0` = every day).
    pub fn from_fields(
        number: u32,
        date: Option<&str>,
        time: &str,
        days: Option<&str>,
    ) -> Option<Self> {
        let time = parse_time(time)?;
        let date = match date {
            Some(d) if !d.trim().is_empty() => Some(parse_date(d)?),
            _ => None,
        };
        let days = days.map(parse_days);
        let mut alarm = Self::recurring(number, time, days).ok()?;
        alarm.date = date;
        Some(alarm)
    }

    /// Parse one `+CALA:` line (or the bare argument list of `AT+CALA=`).
    /// Returns `None` when the date, time or index can't be read.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = ALARM_LINE.captures(text.trim())?;

        let date = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(y), Some(m), Some(d)) => {
                let year: i32 = y.as_str().parse().ok()?;
                let year = if y.as_str().len() <= 2 {
                    normalize_year(year)
                } else {
                    year
                };
                Some(NaiveDate::from_ymd_opt(
                    year,
                    m.as_str().parse().ok()?,
                    d.as_str().parse().ok()?,
                )?)
            }
            _ => None,
        };

        let seconds = match caps.get(6) {
            Some(s) => s.as_str().parse().ok()?,
            None => 0,
        };
        let time = NaiveTime::from_hms_opt(caps[4].parse().ok()?, caps[5].parse().ok()?, seconds)?;
        let number: u32 = caps[7].parse().ok()?;

        let recurrence = caps
            .get(8)
            .or_else(|| caps.get(9))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty());

        let alarm = match recurrence {
            Some(spec) => {
                let mut alarm = Self::recurring(number, time, Some(parse_days(spec)))
                    .unwrap_or_else(|_| Self::every_day(number, time));
                alarm.date = date;
                alarm
            }
            None => match date {
                Some(date) => Self::one_time(number, date, time),
                None => Self::every_day(number, time),
            },
        };
        Some(alarm)
    }

    /// Parse every alarm of an `AT+CALA?` reply
    pub fn parse_all(text: &str) -> Vec<Self> {
        text.lines().filter_map(Self::parse).collect()
    }

    /// Argument list for `AT+CALA=`
    pub fn to_wire(&self) -> String {
        let stamp = match self.date {
            Some(date) => format!(
                "{:02}/{:02}/{:02},{}",
                date.year() % 100,
                date.month(),
                date.day(),
                self.time.format("%H:%M:%S")
            ),
            None => self.time.format("%H:%M:%S").to_string(),
        };

        if self.one_time {
            return format!("\"{stamp}\",{}", self.number);
        }

        let recurrence = match &self.days {
            Some(days) if !self.for_all_days => days
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(","),
            _ => ALL_DAYS.to_string(),
        };
        format!("\"{stamp}\",{},0,\"\",\"{recurrence}\"", self.number)
    }

    fn every_day(number: u32, time: NaiveTime) -> Self {
        Self {
            time,
            date: None,
            one_time: false,
            for_all_days: true,
            days: None,
            number,
        }
    }
}

impl fmt::Display for PhoneAlarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Index range advertised by `AT+CALA=?`
pub fn parse_alarm_slots(text: &str) -> Option<RangeInclusive<u32>> {
    let caps = ALARM_SLOTS.captures(text)?;
    let first: u32 = caps[1].parse().ok()?;
    let last = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => first,
    };
    Some(first..=last)
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let mut parts = text.trim().split('/');
    let year: i32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let day: u32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(normalize_year(year), month, day)
}

/// Unreadable tokens are dropped; the caller treats an empty set as every day
fn parse_days(text: &str) -> BTreeSet<u8> {
    text.split(',')
        .filter_map(|d| d.trim().parse::<u8>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_epoch() {
        assert_eq!(normalize_year(5), 2005);
        assert_eq!(normalize_year(79), 2079);
        assert_eq!(normalize_year(80), 1980);
        assert_eq!(normalize_year(99), 1999);
        assert_eq!(normalize_year(2024), 2024);
    }

    #[test]
    fn test_round_trip() {
        let alarm = PhoneAlarm::from_fields(3, Some("05/08/24"), "07:30:00", Some("1,3,5")).unwrap();
        let wire = alarm.to_wire();
        assert_eq!(wire, "\"05/08/24,07:30:00\",3,0,\"\",\"1,3,5\"");

        let parsed = PhoneAlarm::parse(&wire).unwrap();
        assert_eq!(parsed.number, 3);
        assert_eq!(parsed.time, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(parsed.days, Some(BTreeSet::from([1, 3, 5])));
        assert!(!parsed.for_all_days);
        assert!(!parsed.one_time);
    }

    #[test]
    fn test_all_days_sentinel() {
        let none = PhoneAlarm::from_fields(1, None, "06:00", None).unwrap();
        assert!(none.for_all_days);
        assert_eq!(none.days, None);

        let zero = PhoneAlarm::from_fields(1, None, "06:00", Some("0")).unwrap();
        assert!(zero.for_all_days);

        let parsed = PhoneAlarm::parse(&zero.to_wire()).unwrap();
        assert!(parsed.for_all_days);
    }

    #[test]
    fn test_one_time() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let time = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
        let alarm = PhoneAlarm::one_time(2, date, time);
        assert_eq!(alarm.to_wire(), "\"24/01/02,09:15:00\",2");

        let parsed = PhoneAlarm::parse(&format!("+CALA: {}", alarm.to_wire())).unwrap();
        assert!(parsed.one_time);
        assert_eq!(parsed.date, Some(date));
    }

    #[test]
    fn test_parse_device_shapes() {
        let full = PhoneAlarm::parse("+CALA: \"99/12/31,23:59:00+04\",1,0,\"wake\",\"6,7\"").unwrap();
        assert_eq!(full.date, NaiveDate::from_ymd_opt(1999, 12, 31));
        assert_eq!(full.days, Some(BTreeSet::from([6, 7])));

        let bare = PhoneAlarm::parse("+CALA: \"07:00\",4,0,,1,2").unwrap();
        assert_eq!(bare.number, 4);
        assert_eq!(bare.days, Some(BTreeSet::from([1, 2])));
    }

    #[test]
    fn test_required_fields() {
        assert!(PhoneAlarm::parse("+CALA: \"24/13/40,07:00:00\",1").is_none());
        assert!(PhoneAlarm::parse("+CALA: \"25:00\",1").is_none());
        assert!(PhoneAlarm::parse("OK").is_none());
        assert!(PhoneAlarm::from_fields(1, Some("xx/01/01"), "07:00", None).is_none());
    }

    #[test]
    fn test_invalid_day() {
        let time = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        assert_eq!(
            PhoneAlarm::recurring(1, time, Some(BTreeSet::from([8]))),
            Err(AlarmError::InvalidDay(8))
        );
    }

    #[test]
    fn test_parse_all_and_slots() {
        let reply = "AT+CALA?\r\r\n+CALA: \"07:00:00\",1,0,\"\",\"0\"\r\n+CALA: \"08:00:00\",2,0,\"\",\"2\"\r\n\r\nOK\r\n";
        let alarms = PhoneAlarm::parse_all(reply);
        assert_eq!(alarms.len(), 2);
        assert_eq!(alarms[1].number, 2);

        assert_eq!(parse_alarm_slots("+CALA: (1-5),(0),(255)"), Some(1..=5));
        assert_eq!(parse_alarm_slots("+CALA: (1),(0)"), Some(1..=1));
    }
}
