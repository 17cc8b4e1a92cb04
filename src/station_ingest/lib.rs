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

//! Batch ingest of the latest weather station observations into InfluxDB
//!
//! ## Features
//!
//! `station_ingest` reads a list of weather stations from a CSV file, fetches the most recent
//! observation for each of them from the [Grafcan sensor API], and writes the observed values
//! to [InfluxDB]. It makes a single pass over all stations and exits, so it is meant to be run
//! periodically by cron, a Systemd timer, or similar.
//!
//! * Each station is written to a measurement named after its location, e.g. a station at
//!   "Plaza de España (Centro)" is written to `plaza_de_espana_centro`.
//! * Every column of the stations file (except the identifier) is attached to the points of
//!   that station as a tag.
//! * Observed values that are missing (`null`) are dropped. Observations without any values
//!   left are not written.
//! * A station that can't be fetched or written is logged and skipped, the rest of the
//!   stations are still processed.
//!
//! [Grafcan sensor API]: https://sensores.grafcan.es/api/v1.0/
//! [InfluxDB]: https://docs.influxdata.com/influxdb/v1/
//!
//! ## Build
//!
//! `station_ingest` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Stations file
//!
//! The stations file is a CSV file with a header row. By default the `things_id` column is
//! used to identify stations and the `locations_name` column is used to name measurements.
//! Both can be changed with `--id-column` and `--location-column`.
//!
//! ```text
//! things_id,locations_name,locations_latitude,locations_longitude
//! 2,Plaza de España (Centro),28.4682,-16.2486
//! 7,La Laguna,28.4874,-16.3159
//! ```
//!
//! ### Refreshing the stations file
//!
//! The `station_registry` program builds the stations file from the Grafcan API: every
//! station with exactly one location becomes a row with `things_*` columns for the station
//! and `locations_*` columns for its location. Accents are removed from all text.
//!
//! ```text
//! GRAFCAN_TOKEN=secret ./station_registry --output stations.csv
//! ```
//!
//! ### Run
//!
//! An API key for the Grafcan API must be provided with `--api-token` or the
//! `GRAFCAN_TOKEN` environment variable.
//!
//! ```text
//! GRAFCAN_TOKEN=secret ./station_ingest --stations stations.csv --influx-url http://localhost:8086/
//! ```
//!
//! When a station has no values left after removing nulls, the default is to still call
//! InfluxDB with the (empty) set of points, which is a no-op. Use `--empty-writes skip` to
//! skip the call and count the station separately.
//!
//! ### Metrics
//!
//! Use `--metrics-file` to write counts of what happened during the run to a file in the
//! Prometheus text format. Point the [node_exporter textfile collector] at the directory
//! the file is written to.
//!
//! * `station_ingest_stations_total{outcome=$OUTCOME}` - Stations by outcome: `written`,
//!   `skipped_empty`, `fetch_error`, `write_error`, or `unexpected`.
//! * `station_ingest_points_written_total` - Points written to InfluxDB.
//! * `station_ingest_last_run_duration_seconds` - How long the run took.
//! * `station_ingest_last_run_timestamp_seconds` - When the run finished.
//!
//! [node_exporter textfile collector]: https://github.com/prometheus/node_exporter#textfile-collector
//!

pub mod catalog;
pub mod client;
pub mod ingest;
pub mod metrics;
pub mod normalize;
pub mod point;
pub mod registry;
pub mod status;
pub mod store;
