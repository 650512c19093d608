//! Daily aggregation of forecast observations
//!
//! Reduces observations to one [`DailyStat`] per `(location, date)` pair that
//! actually has readings inside a closed [`DateRange`]. Nothing is interpolated
//! or zero-filled: a day without readings simply has no row.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::{DailyStat, Observation};

/// Errors raised while preparing an aggregation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    /// The range start falls after its end
    #[error("start date {start} is after end date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

/// Closed calendar-date range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a range, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AggregateError> {
        if start > end {
            return Err(AggregateError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// A range covering one day
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    /// Every calendar date of the range, ascending
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .collect()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_day() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

/// Running totals for one `(location, date)` group
#[derive(Debug)]
struct Accumulator {
    temp_sum: f64,
    temp_min: f64,
    temp_max: f64,
    count: usize,
    precip_sum: f64,
    humidity_sum: f64,
    humidity_count: usize,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            temp_sum: 0.0,
            temp_min: f64::INFINITY,
            temp_max: f64::NEG_INFINITY,
            count: 0,
            precip_sum: 0.0,
            humidity_sum: 0.0,
            humidity_count: 0,
        }
    }

    fn add(&mut self, obs: &Observation) {
        self.temp_sum += obs.temperature;
        self.temp_min = self.temp_min.min(obs.temperature);
        self.temp_max = self.temp_max.max(obs.temperature);
        self.count += 1;
        self.precip_sum += obs.precipitation;
        if let Some(h) = obs.humidity {
            self.humidity_sum += h;
            self.humidity_count += 1;
        }
    }

    fn finish(self, location: usize, date: NaiveDate) -> DailyStat {
        // Clamp absorbs summation rounding so min <= mean <= max always holds
        let temp_mean = (self.temp_sum / self.count as f64).clamp(self.temp_min, self.temp_max);
        let humidity_mean =
            (self.humidity_count > 0).then(|| self.humidity_sum / self.humidity_count as f64);
        DailyStat {
            location,
            date,
            temp_mean,
            temp_min: self.temp_min,
            temp_max: self.temp_max,
            precip_sum: self.precip_sum,
            humidity_mean,
        }
    }
}

/// Aggregates observations into daily statistics within `range`
///
/// # Arguments
/// * `observations` - Readings from any number of locations, in any order
/// * `range` - Closed date range; readings outside it are ignored
///
/// # Returns
/// One `DailyStat` per `(location, date)` pair that has at least one reading,
/// ordered by location id, then date. Empty input, or input with no reading
/// inside the range, yields an empty vector.
pub fn aggregate_daily<'a, I>(observations: I, range: &DateRange) -> Vec<DailyStat>
where
    I: IntoIterator<Item = &'a Observation>,
{
    let mut groups: BTreeMap<(usize, NaiveDate), Accumulator> = BTreeMap::new();
    for obs in observations {
        let date = obs.date();
        if !range.contains(date) {
            continue;
        }
        groups
            .entry((obs.location, date))
            .or_insert_with(Accumulator::new)
            .add(obs);
    }

    groups
        .into_iter()
        .map(|((location, date), acc)| acc.finish(location, date))
        .collect()
}
