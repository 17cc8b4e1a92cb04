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

use crate::client::{FetchError, ObservationSource};
use crate::normalize::category_name;
use crate::point::sanitize;
use crate::registry::{StationId, StationRecord};
use crate::store::{PointStore, WriteError};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level};

pub const DEFAULT_DATABASE: &str = "grafcan";
pub const DEFAULT_LOCATION_ATTRIBUTE: &str = "locations_name";

/// What to do with a station whose observation has no usable fields left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EmptyWrites {
    /// Call the store with an empty set of points and let it decide what to do
    #[default]
    Write,
    /// Don't call the store at all
    Skip,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database: String,
    pub location_attribute: String,
    pub empty_writes: EmptyWrites,
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            database: DEFAULT_DATABASE.to_owned(),
            location_attribute: DEFAULT_LOCATION_ATTRIBUTE.to_owned(),
            empty_writes: EmptyWrites::default(),
            concurrency: 1,
        }
    }
}

/// Result of successfully processing a single station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationOutcome {
    Written { points: usize },
    SkippedEmpty,
}

/// Reason a single station was skipped. None of these stop the batch.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("write failed: {0}")]
    Write(#[from] WriteError),
    #[error("{0}")]
    Unexpected(String),
}

/// Counts of what happened to each station during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub written: usize,
    pub skipped_empty: usize,
    pub fetch_errors: usize,
    pub write_errors: usize,
    pub unexpected_errors: usize,
    pub points_written: usize,
}

impl BatchSummary {
    pub fn record(&mut self, result: &Result<StationOutcome, StationError>) {
        self.processed += 1;
        match result {
            Ok(StationOutcome::Written { points }) => {
                self.written += 1;
                self.points_written += points;
            }
            Ok(StationOutcome::SkippedEmpty) => self.skipped_empty += 1,
            Err(StationError::Fetch(_)) => self.fetch_errors += 1,
            Err(StationError::Write(_)) => self.write_errors += 1,
            Err(StationError::Unexpected(_)) => self.unexpected_errors += 1,
        }
    }

    /// Number of stations that failed for any reason.
    pub fn failed(&self) -> usize {
        self.fetch_errors + self.write_errors + self.unexpected_errors
    }
}

struct Pipeline {
    source: Arc<dyn ObservationSource>,
    store: Arc<dyn PointStore>,
    config: IngestConfig,
}

impl Pipeline {
    async fn process(&self, station: &StationRecord) -> Result<StationOutcome, StationError> {
        let raw = self.source.last_observation(&station.id).await?;
        let location = station.attribute(&self.config.location_attribute).ok_or_else(|| {
            StationError::Unexpected(format!(
                "station has no {:?} attribute",
                self.config.location_attribute
            ))
        })?;

        let measurement = category_name(location);
        let points = sanitize(&raw, &measurement);
        if points.is_empty() && self.config.empty_writes == EmptyWrites::Skip {
            tracing::debug!(message = "no valid points, skipping write", measurement = %measurement);
            return Ok(StationOutcome::SkippedEmpty);
        }

        tracing::debug!(message = "writing observation", measurement = %measurement, points = points.len());
        self.store
            .write_points(&self.config.database, &points, &station.metadata)
            .await?;

        Ok(StationOutcome::Written { points: points.len() })
    }
}

/// Fetches, sanitizes and writes the latest observation of every station.
///
/// Each station is processed on its own task so a failure (or panic) while handling
/// one station is recorded in the summary and never stops the rest of the batch. At
/// most `concurrency` stations are in flight at once and stations are started in the
/// order given.
pub struct Ingester {
    pipeline: Arc<Pipeline>,
}

impl Ingester {
    pub fn new(source: Arc<dyn ObservationSource>, store: Arc<dyn PointStore>, config: IngestConfig) -> Self {
        Ingester {
            pipeline: Arc::new(Pipeline { source, store, config }),
        }
    }

    /// Process a single station without any isolation from panics.
    pub async fn process_station(&self, station: &StationRecord) -> Result<StationOutcome, StationError> {
        self.pipeline.process(station).await
    }

    /// Process all stations, in order, and return counts of the outcomes.
    pub async fn run(&self, stations: &[StationRecord]) -> BatchSummary {
        let limit = self.pipeline.config.concurrency.max(1);
        let mut summary = BatchSummary::default();
        let mut in_flight: VecDeque<(StationId, JoinHandle<Result<StationOutcome, StationError>>)> = VecDeque::new();

        tracing::info!(
            message = "station ingest started",
            stations = stations.len(),
            database = %self.pipeline.config.database,
            concurrency = limit,
        );

        for station in stations {
            if in_flight.len() >= limit {
                if let Some((id, handle)) = in_flight.pop_front() {
                    Self::finish(&mut summary, &id, handle).await;
                }
            }

            tracing::info!(message = "processing station", station = %station.id);
            let pipeline = Arc::clone(&self.pipeline);
            let station = station.clone();
            let span = tracing::span!(Level::DEBUG, "station_ingest_station", station = %station.id);
            let id = station.id.clone();
            let handle = tokio::spawn(async move { pipeline.process(&station).await }.instrument(span));

            in_flight.push_back((id, handle));
        }

        while let Some((id, handle)) = in_flight.pop_front() {
            Self::finish(&mut summary, &id, handle).await;
        }

        tracing::info!(
            message = "station ingest completed",
            processed = summary.processed,
            written = summary.written,
            skipped_empty = summary.skipped_empty,
            fetch_errors = summary.fetch_errors,
            write_errors = summary.write_errors,
            unexpected_errors = summary.unexpected_errors,
            points_written = summary.points_written,
        );

        summary
    }

    async fn finish(
        summary: &mut BatchSummary,
        id: &StationId,
        handle: JoinHandle<Result<StationOutcome, StationError>>,
    ) {
        let result = match handle.await {
            Ok(res) => res,
            Err(e) => Err(StationError::Unexpected(format!("station task failed: {}", e))),
        };

        match &result {
            Ok(StationOutcome::Written { points }) => {
                tracing::info!(message = "observation written", station = %id, points = *points);
            }
            Ok(StationOutcome::SkippedEmpty) => {
                tracing::info!(message = "no valid points for station", station = %id);
            }
            Err(StationError::Fetch(e)) => {
                tracing::warn!(message = "failed to fetch observation", station = %id, error = %e);
            }
            Err(StationError::Write(e)) => {
                tracing::error!(message = "failed to write observation", station = %id, error = %e);
            }
            Err(StationError::Unexpected(e)) => {
                tracing::error!(
                    message = "unexpected failure processing station",
                    station = %id,
                    kind = "unexpected",
                    error = %e,
                );
            }
        }

        summary.record(&result);
    }
}
