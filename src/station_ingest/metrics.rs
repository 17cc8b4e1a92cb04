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
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const OUTCOME_WRITTEN: &str = "written";
const OUTCOME_SKIPPED_EMPTY: &str = "skipped_empty";
const OUTCOME_FETCH_ERROR: &str = "fetch_error";
const OUTCOME_WRITE_ERROR: &str = "write_error";
const OUTCOME_UNEXPECTED: &str = "unexpected";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("unable to encode metrics: {0}")]
    Encode(#[from] std::fmt::Error),
    #[error("unable to write metrics: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: String,
}

/// Holder for metrics describing a single ingest run.
///
/// All metrics are created and registered upon call to `IngestMetrics::new()` and
/// share the prefix "station_ingest_". They are meant to be written to a file picked
/// up by the node_exporter textfile collector once the run is over.
#[derive(Debug)]
pub struct IngestMetrics {
    stations: Family<OutcomeLabels, Counter>,
    points_written: Counter,
    last_run_duration: Gauge<f64, AtomicU64>,
    last_run_timestamp: Gauge<f64, AtomicU64>,
}

impl IngestMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let stations = Family::<OutcomeLabels, Counter>::default();
        let points_written = Counter::default();
        let last_run_duration = Gauge::<f64, AtomicU64>::default();
        let last_run_timestamp = Gauge::<f64, AtomicU64>::default();

        reg.register(
            "station_ingest_stations",
            "Stations processed by outcome",
            stations.clone(),
        );
        reg.register(
            "station_ingest_points_written",
            "Points written to the store",
            points_written.clone(),
        );
        reg.register(
            "station_ingest_last_run_duration_seconds",
            "Duration of the last run in seconds",
            last_run_duration.clone(),
        );
        reg.register(
            "station_ingest_last_run_timestamp_seconds",
            "Time the last run finished as a UNIX timestamp",
            last_run_timestamp.clone(),
        );

        Self {
            stations,
            points_written,
            last_run_duration,
            last_run_timestamp,
        }
    }

    /// Set metrics from the summary of a finished run.
    ///
    /// Every outcome label is set, even when zero, so the series exist for alerting.
    pub fn observe(&self, summary: &BatchSummary, elapsed: Duration) {
        self.inc_outcome(OUTCOME_WRITTEN, summary.written);
        self.inc_outcome(OUTCOME_SKIPPED_EMPTY, summary.skipped_empty);
        self.inc_outcome(OUTCOME_FETCH_ERROR, summary.fetch_errors);
        self.inc_outcome(OUTCOME_WRITE_ERROR, summary.write_errors);
        self.inc_outcome(OUTCOME_UNEXPECTED, summary.unexpected_errors);
        self.points_written.inc_by(summary.points_written as u64);
        self.last_run_duration.set(elapsed.as_secs_f64());

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.last_run_timestamp.set(now);
    }

    fn inc_outcome(&self, outcome: &str, count: usize) {
        self.stations
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_owned(),
            })
            .inc_by(count as u64);
    }
}

/// Encode every metric in the registry using the OpenMetrics text format.
pub fn encode_text(reg: &Registry) -> Result<String, MetricsError> {
    let mut buf = String::new();
    encode(&mut buf, reg)?;
    Ok(buf)
}

/// Write metrics to `path`, replacing any existing file.
///
/// Metrics are written to a temporary file next to `path` and renamed into place so
/// a collector never reads a partially written file.
pub async fn write_textfile(reg: &Registry, path: &Path) -> Result<(), MetricsError> {
    let buf = encode_text(reg)?;
    let tmp = path.with_extension("tmp");

    tokio::fs::write(&tmp, buf.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    tracing::debug!(message = "wrote metrics textfile", path = %path.display(), num_bytes = buf.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{encode_text, write_textfile, IngestMetrics};
    use crate::ingest::BatchSummary;
    use prometheus_client::registry::Registry;
    use std::time::Duration;

    fn summary() -> BatchSummary {
        BatchSummary {
            processed: 5,
            written: 3,
            skipped_empty: 0,
            fetch_errors: 1,
            write_errors: 0,
            unexpected_errors: 1,
            points_written: 4,
        }
    }

    #[test]
    fn test_observe_summary() {
        let mut reg = Registry::default();
        let metrics = IngestMetrics::new(&mut reg);
        metrics.observe(&summary(), Duration::from_millis(1500));

        let text = encode_text(&reg).unwrap();

        assert!(text.contains("station_ingest_stations_total{outcome=\"written\"} 3"), "{}", text);
        assert!(text.contains("station_ingest_stations_total{outcome=\"fetch_error\"} 1"), "{}", text);
        assert!(text.contains("station_ingest_stations_total{outcome=\"write_error\"} 0"), "{}", text);
        assert!(text.contains("station_ingest_points_written_total 4"), "{}", text);
        assert!(text.contains("station_ingest_last_run_duration_seconds 1.5"), "{}", text);
    }

    #[tokio::test]
    async fn test_write_textfile() {
        let mut reg = Registry::default();
        let metrics = IngestMetrics::new(&mut reg);
        metrics.observe(&summary(), Duration::from_secs(2));

        let dir = std::env::temp_dir().join(format!("station_ingest_metrics_{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("station_ingest.prom");

        write_textfile(&reg, &path).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();

        assert!(contents.contains("station_ingest_stations_total{outcome=\"unexpected\"} 1"));
        assert!(!dir.join("station_ingest.tmp").exists());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
