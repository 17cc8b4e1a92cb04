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

use clap::Parser;
use prometheus_client::registry::Registry;
use reqwest::{Client, Url};
use station_ingest::client::GrafcanClient;
use station_ingest::ingest::{EmptyWrites, IngestConfig, Ingester, DEFAULT_DATABASE, DEFAULT_LOCATION_ATTRIBUTE};
use station_ingest::metrics::IngestMetrics;
use station_ingest::status::RunStatus;
use station_ingest::store::{InfluxClient, PointStore};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_ID_COLUMN: &str = "things_id";
const DEFAULT_API_URL: &str = "https://sensores.grafcan.es/api/v1.0/";
const DEFAULT_INFLUX_URL: &str = "http://localhost:8086/";

#[derive(Debug, Parser)]
#[clap(name = "station_ingest", version = clap::crate_version!())]
struct StationIngestApplication {
    /// CSV file with one row per station. Every column other than the identifier
    /// column is attached to written points as a tag.
    #[clap(long)]
    stations: PathBuf,

    /// Column of the stations file that uniquely identifies a station
    #[clap(long, default_value_t = DEFAULT_ID_COLUMN.into())]
    id_column: String,

    /// Column of the stations file with the location name, used to derive the
    /// measurement name for points of the station
    #[clap(long, default_value_t = DEFAULT_LOCATION_ATTRIBUTE.into())]
    location_column: String,

    /// Base URL for the Grafcan sensor API
    #[clap(long, default_value = DEFAULT_API_URL)]
    api_url: Url,

    /// API key for the Grafcan sensor API
    #[clap(long, env = "GRAFCAN_TOKEN", hide_env_values = true)]
    api_token: String,

    /// Base URL for the InfluxDB HTTP API
    #[clap(long, default_value = DEFAULT_INFLUX_URL)]
    influx_url: Url,

    /// Username for InfluxDB, if authentication is enabled
    #[clap(long, env = "INFLUXDB_USERNAME")]
    influx_username: Option<String>,

    /// Password for InfluxDB, if authentication is enabled
    #[clap(long, env = "INFLUXDB_PASSWORD", hide_env_values = true)]
    influx_password: Option<String>,

    /// InfluxDB database to write observations to
    #[clap(long, default_value_t = DEFAULT_DATABASE.into())]
    database: String,

    /// What to do when a station has no observed values left after removing nulls
    #[clap(long, value_enum, default_value_t = EmptyWrites::Write)]
    empty_writes: EmptyWrites,

    /// Maximum number of stations to process at the same time
    #[clap(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Timeout for requests to the Grafcan API and InfluxDB, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Write metrics about the run to this file in the Prometheus text format, for
    /// use with the node_exporter textfile collector
    #[clap(long)]
    metrics_file: Option<PathBuf>,

    /// Record the outcome of the run as a point in this InfluxDB database
    #[clap(long)]
    status_database: Option<String>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = StationIngestApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let startup = Instant::now();
    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let mut influx = InfluxClient::new(http_client.clone(), opts.influx_url.clone());
    if let Some(username) = &opts.influx_username {
        influx = influx.with_credentials(username, opts.influx_password.clone().unwrap_or_default());
    }
    let store = Arc::new(influx);

    let stations = match station_ingest::registry::load_stations(&opts.stations, &opts.id_column) {
        Ok(stations) => stations,
        Err(e) => {
            tracing::error!(message = "unable to load stations", path = %opts.stations.display(), error = %e);
            record_status(store.as_ref(), opts.status_database.as_deref(), RunStatus::Failed).await;
            process::exit(1)
        }
    };

    tracing::info!(message = "loaded stations", path = %opts.stations.display(), stations = stations.len());

    let source = Arc::new(GrafcanClient::new(
        http_client,
        opts.api_url.clone(),
        opts.api_token.clone(),
    ));

    let config = IngestConfig {
        database: opts.database.clone(),
        location_attribute: opts.location_column.clone(),
        empty_writes: opts.empty_writes,
        concurrency: opts.concurrency,
    };

    let ingester = Ingester::new(source, store.clone(), config);
    let summary = ingester.run(&stations).await;

    record_status(store.as_ref(), opts.status_database.as_deref(), RunStatus::Completed(&summary)).await;

    if let Some(path) = &opts.metrics_file {
        let mut registry = Registry::default();
        let metrics = IngestMetrics::new(&mut registry);
        metrics.observe(&summary, startup.elapsed());

        if let Err(e) = station_ingest::metrics::write_textfile(&registry, path).await {
            tracing::error!(message = "failed to write metrics file", path = %path.display(), error = %e);
        }
    }

    tracing::info!(
        message = "run finished",
        succeeded = summary.written + summary.skipped_empty,
        failed = summary.failed(),
        runtime_secs = startup.elapsed().as_secs_f64(),
    );

    Ok(())
}

/// Write the outcome of the run to the status database, if one is configured
async fn record_status<S: PointStore + ?Sized>(store: &S, database: Option<&str>, status: RunStatus<'_>) {
    let database = match database {
        Some(database) => database,
        None => return,
    };

    match station_ingest::status::write_status(store, database, status).await {
        Ok(_) => tracing::debug!(message = "recorded run status", database = %database),
        Err(e) => tracing::error!(message = "failed to record run status", database = %database, error = %e),
    }
}
