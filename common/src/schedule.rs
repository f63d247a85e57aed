use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid time of day '{0}', expected HH:MM")]
    InvalidTime(String),
    #[error("malformed schedule token '{0}', expected HH:MM/temp")]
    InvalidToken(String),
}

/// Minutes since midnight on a 24h cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_minutes(minutes: u16) -> Self {
        Self(minutes % MINUTES_PER_DAY)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Forward duration in minutes from `self` to `other`, wrapping past
    /// midnight.
    pub fn forward_to(self, other: TimeOfDay) -> u16 {
        (other.0 + MINUTES_PER_DAY - self.0) % MINUTES_PER_DAY
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTime(s.to_string());
        let (hours, minutes) = s.split_once(':').ok_or_else(invalid)?;
        let hours: u16 = hours.parse().map_err(|_| invalid())?;
        let minutes: u16 = minutes.parse().map_err(|_| invalid())?;
        if hours > 23 || minutes > 59 {
            return Err(invalid());
        }
        Ok(Self(hours * 60 + minutes))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulePoint {
    pub time: TimeOfDay,
    pub temperature: f64,
}

/// One day's heating breakpoints in device-native order: unique
/// times-of-day, sorted ascending, always including 00:00.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySchedule {
    points: Vec<SchedulePoint>,
}

impl DaySchedule {
    pub fn points(&self) -> &[SchedulePoint] {
        &self.points
    }

    /// Derives the breakpoints from a day/night set point policy: 2 evenly
    /// spaced points across the night span and 4 across the day span, each
    /// span starting exactly at its switch time, interpolated times rounded
    /// to the nearest minute. `day_time` and `night_time` must differ;
    /// config validation rejects equal switch times before this is reached.
    pub fn generate(
        day_time: TimeOfDay,
        day_temperature: f64,
        night_time: TimeOfDay,
        night_temperature: f64,
    ) -> Self {
        let night_span = night_time.forward_to(day_time);
        let day_span = day_time.forward_to(night_time);

        let mut points = Vec::with_capacity(6);
        push_segment(&mut points, night_time, night_span, 2, night_temperature);
        push_segment(&mut points, day_time, day_span, 4, day_temperature);

        if !points.iter().any(|point| point.time.minutes() == 0) {
            force_midnight(&mut points, day_time, night_time);
        }

        // Stable sort, then keep the earliest-generated point per time.
        points.sort_by_key(|point| point.time);
        points.dedup_by_key(|point| point.time);

        Self { points }
    }
}

fn push_segment(
    points: &mut Vec<SchedulePoint>,
    start: TimeOfDay,
    span: u16,
    count: u16,
    temperature: f64,
) {
    let step = f64::from(span) / f64::from(count);
    for i in 0..count {
        let offset = (f64::from(i) * step).round() as u16;
        points.push(SchedulePoint {
            time: TimeOfDay::from_minutes(start.minutes() + offset),
            temperature,
        });
    }
}

/// The segment whose start is numerically greater is the one that wraps
/// past midnight. Its start is a user-set switch time and stays put; the
/// interior point cyclically nearest midnight moves to 00:00 instead.
fn force_midnight(points: &mut [SchedulePoint], day_time: TimeOfDay, night_time: TimeOfDay) {
    let interior = if night_time > day_time {
        &mut points[1..2]
    } else {
        &mut points[3..6]
    };

    if let Some(nearest) = interior.iter_mut().min_by_key(|point| {
        let minutes = point.time.minutes();
        minutes.min(MINUTES_PER_DAY - minutes)
    }) {
        nearest.time = TimeOfDay::from_minutes(0);
    }
}

impl fmt::Display for DaySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, point) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}/{}", point.time, point.temperature)?;
        }
        Ok(())
    }
}

impl FromStr for DaySchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut points = Vec::new();
        for token in s.split_whitespace() {
            let invalid = || ScheduleError::InvalidToken(token.to_string());
            let (time, temperature) = token.split_once('/').ok_or_else(invalid)?;
            points.push(SchedulePoint {
                time: time.parse().map_err(|_| invalid())?,
                temperature: temperature.parse().map_err(|_| invalid())?,
            });
        }
        Ok(Self { points })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn time(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn parses_and_formats_times() {
        assert_eq!(time("05:00").minutes(), 300);
        assert_eq!(time("23:59").minutes(), 1439);
        assert_eq!(time("09:05").to_string(), "09:05");
        assert_eq!(time("00:00").to_string(), "00:00");
    }

    #[test]
    fn rejects_malformed_times() {
        for bad in ["5", "24:00", "12:60", "ab:cd", "12:", ""] {
            assert_eq!(
                bad.parse::<TimeOfDay>(),
                Err(ScheduleError::InvalidTime(bad.to_string())),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn wraps_forward_durations_past_midnight() {
        assert_eq!(time("23:00").forward_to(time("05:00")), 360);
        assert_eq!(time("05:00").forward_to(time("23:00")), 1080);
    }

    #[test]
    fn generates_the_standard_day_night_cycle() {
        // Night segment starts exactly at 23:00; its interior point 02:00
        // is the one moved onto midnight.
        let schedule = DaySchedule::generate(time("05:00"), 21.0, time("23:00"), 19.0);

        assert_eq!(
            schedule.to_string(),
            "00:00/19 05:00/21 09:30/21 14:00/21 18:30/21 23:00/19"
        );
    }

    #[test]
    fn keeps_a_naturally_generated_midnight_point() {
        let schedule = DaySchedule::generate(time("22:00"), 21.0, time("06:00"), 19.0);

        assert_eq!(
            schedule.to_string(),
            "00:00/21 02:00/21 04:00/21 06:00/19 14:00/19 22:00/21"
        );
    }

    #[test]
    fn forces_midnight_onto_the_day_segment_when_it_wraps() {
        // Day segment 23:00 -> 05:00 crosses midnight; its interior point
        // 00:30 is nearest and becomes 00:00. The 23:00 start stays put.
        let schedule = DaySchedule::generate(time("23:00"), 21.0, time("05:00"), 19.0);

        assert_eq!(
            schedule.to_string(),
            "00:00/21 02:00/21 03:30/21 05:00/19 14:00/19 23:00/21"
        );
    }

    #[test]
    fn deduplicates_colliding_points_keeping_the_earliest() {
        let schedule = DaySchedule::generate(time("00:01"), 21.0, time("00:02"), 19.0);

        // The four day points collapse onto 00:01/00:02; the night
        // temperature wins at 00:02 because it was generated first.
        assert_eq!(schedule.to_string(), "00:00/19 00:01/21 00:02/19");
    }

    #[test]
    fn always_yields_sorted_unique_points_with_one_midnight() {
        let cases = [
            ("05:00", "23:00"),
            ("23:00", "05:00"),
            ("06:30", "22:45"),
            ("00:00", "12:00"),
            ("12:00", "00:00"),
            ("13:07", "13:08"),
        ];

        for (day, night) in cases {
            let schedule = DaySchedule::generate(time(day), 21.0, time(night), 17.5);
            let points = schedule.points();

            assert!(
                (2..=6).contains(&points.len()),
                "{day}/{night}: got {} points",
                points.len()
            );
            for pair in points.windows(2) {
                assert!(pair[0].time < pair[1].time, "{day}/{night}: not sorted");
            }
            let at_midnight = points
                .iter()
                .filter(|point| point.time.minutes() == 0)
                .count();
            assert_eq!(at_midnight, 1, "{day}/{night}: midnight count");
        }
    }

    #[test]
    fn round_trips_through_the_device_string_form() {
        let schedule = DaySchedule::generate(time("05:00"), 21.5, time("23:00"), 19.0);
        let parsed: DaySchedule = schedule.to_string().parse().unwrap();

        assert_eq!(parsed, schedule);
    }

    #[test]
    fn formats_fractional_temperatures_without_trailing_zeros() {
        let schedule = DaySchedule::generate(time("05:00"), 21.5, time("23:00"), 19.0);
        let rendered = schedule.to_string();

        assert!(rendered.contains("/21.5"), "{rendered}");
        assert!(rendered.starts_with("00:00/19"), "{rendered}");
    }

    #[test]
    fn rejects_malformed_schedule_strings() {
        assert_eq!(
            "06:00-21".parse::<DaySchedule>(),
            Err(ScheduleError::InvalidToken("06:00-21".to_string()))
        );
        assert_eq!(
            "06:00/warm".parse::<DaySchedule>(),
            Err(ScheduleError::InvalidToken("06:00/warm".to_string()))
        );
    }
}
