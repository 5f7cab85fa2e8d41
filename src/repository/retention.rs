// coati is an incremental backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The retention engine ("smart remove").
//!
//! Given a reference time and a keep policy, selects which snapshots to
//! delete. Keep rules are unioned: the newest snapshot, everything
//! inside the keep-all window, the newest snapshot per day / per week /
//! per month for the configured number of windows, and the newest
//! snapshot of every year. Window selectors prefer healthy snapshots
//! and skip ones carrying the failed marker.

use std::{collections::HashSet, sync::Arc};

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};

use crate::{config::Config, repository, repository::sid::Sid};

/// First day of the month after `date`.
pub fn inc_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap()
}

/// First day of the month before `date`.
pub fn dec_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap()
}

fn in_window(sid: &Sid, min_date: NaiveDate, max_date: NaiveDate) -> bool {
    let Some(timestamp) = sid.datetime() else {
        return false;
    };

    let min = min_date.and_hms_opt(0, 0, 0).unwrap();
    let max = max_date.and_hms_opt(0, 0, 0).unwrap();
    timestamp >= min && timestamp < max
}

/// Every snapshot inside `[min_date, max_date)`.
fn keep_all(snapshots: &[Sid], min_date: NaiveDate, max_date: NaiveDate) -> HashSet<Sid> {
    snapshots
        .iter()
        .filter(|sid| in_window(sid, min_date, max_date))
        .cloned()
        .collect()
}

/// The first snapshot inside `[min_date, max_date)` in iteration order
/// (newest first for a repository listing). With `keep_healthy`, failed
/// snapshots are passed over.
fn keep_first(
    snapshots: &[Sid],
    min_date: NaiveDate,
    max_date: NaiveDate,
    keep_healthy: bool,
) -> HashSet<Sid> {
    for sid in snapshots {
        if !in_window(sid, min_date, max_date) {
            continue;
        }
        if keep_healthy && sid.failed() {
            continue;
        }
        return HashSet::from([sid.clone()]);
    }

    HashSet::new()
}

/// Computes the snapshots to delete for the given policy, in the
/// newest-first order of the repository listing.
pub fn smart_remove_list(
    cfg: &Arc<Config>,
    now: NaiveDateTime,
    keep_all_days: u32,
    keep_one_per_day: u32,
    keep_one_per_week: u32,
    keep_one_per_month: u32,
) -> Vec<Sid> {
    let snapshots = repository::list_snapshots(cfg, false, true);
    if snapshots.len() <= 1 {
        return Vec::new();
    }

    let now_date = now.date();
    let mut keep: HashSet<Sid> = HashSet::new();

    // the newest snapshot is always kept
    keep.insert(snapshots[0].clone());

    if keep_all_days > 0 {
        keep.extend(keep_all(
            &snapshots,
            now_date - Days::new(keep_all_days as u64 - 1),
            now_date + Days::new(1),
        ));
    }

    if keep_one_per_day > 0 {
        let mut day = now_date;
        for _ in 0..keep_one_per_day {
            keep.extend(keep_first(&snapshots, day, day + Days::new(1), true));
            day = day - Days::new(1);
        }
    }

    if keep_one_per_week > 0 {
        let mut day =
            now_date - Days::new(now_date.weekday().num_days_from_monday() as u64 + 1);
        for _ in 0..keep_one_per_week {
            keep.extend(keep_first(&snapshots, day, day + Days::new(8), true));
            day = day - Days::new(7);
        }
    }

    if keep_one_per_month > 0 {
        let mut d1 = NaiveDate::from_ymd_opt(now_date.year(), now_date.month(), 1).unwrap();
        let mut d2 = inc_month(d1);
        for _ in 0..keep_one_per_month {
            keep.extend(keep_first(&snapshots, d1, d2, true));
            d2 = d1;
            d1 = dec_month(d1);
        }
    }

    // keep one snapshot per year, for all years
    if let Some(first_year) = snapshots.last().and_then(|sid| sid.split()).map(|t| t.0) {
        for year in first_year..=now_date.year() {
            keep.extend(keep_first(
                &snapshots,
                NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap(),
                true,
            ));
        }
    }

    snapshots
        .into_iter()
        .filter(|sid| !keep.contains(sid))
        .collect()
}
