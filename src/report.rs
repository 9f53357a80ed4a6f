//! Read-only aggregation of cycle summaries for historical review.
//!
//! Reports are a pure function of [CycleStore::get_query](
//! crate::stores::CycleStore::get_query) output: the store produces the
//! summaries, this module only groups and sums them.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use time::{Date, Duration};

use crate::{
    Error,
    money::{Distance, Money},
    stores::CycleSummary,
};

/// The period boundary to group cycles by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// One calendar day per bucket.
    Day,
    /// One ISO week per bucket, starting on Monday.
    Week,
    /// One calendar month per bucket.
    Month,
}

impl Period {
    /// Parses the lowercase period name used in query strings.
    pub fn parse(text: &str) -> Result<Self, Error> {
        match text {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            other => Err(Error::Validation(format!(
                "\"{other}\" is not a valid period, expected day, week, or month"
            ))),
        }
    }

    /// The first day of the period containing `date`.
    fn start_of(self, date: Date) -> Date {
        match self {
            Period::Day => date,
            Period::Week => {
                date - Duration::days(date.weekday().number_days_from_monday() as i64)
            }
            Period::Month => date.replace_day(1).expect("day 1 exists in every month"),
        }
    }
}

/// The summed totals of all cycles that started within one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodReport {
    /// The first day of the period.
    #[serde(serialize_with = "serialize_date")]
    pub period_start: Date,
    /// How many cycles fell into the period.
    pub cycle_count: usize,
    /// How many rides those cycles hold altogether.
    pub ride_count: i64,
    /// The gross revenue across the period.
    pub total_fare: Money,
    /// The distance covered across the period.
    pub total_distance_km: Distance,
    /// The expenses incurred across the period.
    pub total_expenses: Money,
    /// `total_fare` minus `total_expenses`.
    pub net_earning: Money,
    /// `total_fare` divided by `total_distance_km`, or `None` when no
    /// distance was covered in the period.
    pub yield_per_km: Option<Money>,
}

/// Groups cycle summaries by the period their start time falls into and
/// sums their totals, earliest period first.
///
/// The caller decides which cycles take part; historical reports normally
/// pass archived (and optionally closed) cycles only.
pub fn summarize_cycles(summaries: &[CycleSummary], period: Period) -> Vec<PeriodReport> {
    let mut buckets: BTreeMap<Date, PeriodReport> = BTreeMap::new();

    for summary in summaries {
        let period_start = period.start_of(summary.started_at.date());
        let report = buckets.entry(period_start).or_insert(PeriodReport {
            period_start,
            cycle_count: 0,
            ride_count: 0,
            total_fare: Money::ZERO,
            total_distance_km: Distance::ZERO,
            total_expenses: Money::ZERO,
            net_earning: Money::ZERO,
            yield_per_km: None,
        });

        report.cycle_count += 1;
        report.ride_count += summary.ride_count;
        report.total_fare += summary.totals.total_fare;
        report.total_distance_km += summary.totals.total_distance_km;
        report.total_expenses += summary.totals.total_expenses;
    }

    buckets
        .into_values()
        .map(|mut report| {
            report.net_earning = report.total_fare - report.total_expenses;
            report.yield_per_km = report.total_fare.per_km(report.total_distance_km);
            report
        })
        .collect()
}

fn serialize_date<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    let text = date.format(format).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&text)
}
