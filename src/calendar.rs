//! Month view of reservations, laid out in Monday-first weeks.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::entities::Reservation;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Day {
    pub date: NaiveDate,
    pub in_month: bool,
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    pub weeks: Vec<Vec<Day>>,
}

/// First and last day shown for a month, padded out to whole weeks.
pub fn visible_range(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = next.pred_opt()?;

    let start = first - Duration::days(i64::from(first.weekday().num_days_from_monday()));
    let end = last + Duration::days(6 - i64::from(last.weekday().num_days_from_monday()));
    Some((start, end))
}

impl MonthGrid {
    /// Returns `None` for an impossible year/month.
    pub fn build(year: i32, month: u32, mut reservations: Vec<Reservation>) -> Option<Self> {
        let (start, end) = visible_range(year, month)?;
        reservations.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then(a.id.cmp(&b.id)));

        let mut weeks = Vec::new();
        let mut week = Vec::with_capacity(7);
        let mut date = start;
        while date <= end {
            week.push(Day {
                date,
                in_month: date.month() == month && date.year() == year,
                reservations: Vec::new(),
            });
            if week.len() == 7 {
                weeks.push(std::mem::replace(&mut week, Vec::with_capacity(7)));
            }
            date = date.succ_opt()?;
        }

        for reservation in reservations {
            let day = reservation.starts_at.date_naive();
            if day < start || day > end {
                continue;
            }
            let offset = (day - start).num_days() as usize;
            weeks[offset / 7][offset % 7].reservations.push(reservation);
        }

        Some(Self { year, month, weeks })
    }
}
