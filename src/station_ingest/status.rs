// station_ingest - Batch ingest of the latest weather station observations into InfluxDB
//
// Copyright 2022 Nick Pillitteri
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
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::ingest::BatchSummary;
use crate::point::ValidPoint;
use crate::store::{PointStore, WriteError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub const STATUS_MEASUREMENT: &str = "task_status";
pub const STATUS_FIELD: &str = "task_success_write_last_observations";

/// How a run ended, as recorded in the status database.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunStatus<'a> {
    /// Every station was attempted. Per-station failures don't fail the run.
    Completed(&'a BatchSummary),
    /// The run stopped before any station was attempted.
    Failed,
}

/// Point recording the outcome of a run: `1` for a completed run along with its
/// counts, `0` for a run that failed before processing stations.
pub fn status_point(status: RunStatus<'_>, time: DateTime<Utc>) -> ValidPoint {
    match status {
        RunStatus::Completed(summary) => ValidPoint::single(STATUS_MEASUREMENT, Some(time), STATUS_FIELD, 1i64)
            .with_field("stations_processed", count(summary.processed))
            .with_field("stations_written", count(summary.written))
            .with_field("stations_skipped_empty", count(summary.skipped_empty))
            .with_field("stations_fetch_errors", count(summary.fetch_errors))
            .with_field("stations_write_errors", count(summary.write_errors))
            .with_field("stations_unexpected_errors", count(summary.unexpected_errors)),
        RunStatus::Failed => ValidPoint::single(STATUS_MEASUREMENT, Some(time), STATUS_FIELD, 0i64),
    }
}

/// Write the status point for a run to `database`.
pub async fn write_status<S: PointStore + ?Sized>(
    store: &S,
    database: &str,
    status: RunStatus<'_>,
) -> Result<(), WriteError> {
    let point = status_point(status, Utc::now());
    store.write_points(database, &[point], &BTreeMap::new()).await
}

fn count(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
