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
use reqwest::{Client, Url};
use station_ingest::catalog;
use station_ingest::client::GrafcanClient;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_API_URL: &str = "https://sensores.grafcan.es/api/v1.0/";

#[derive(Debug, Parser)]
#[clap(name = "station_registry", version = clap::crate_version!())]
struct StationRegistryApplication {
    /// Write the stations CSV file here. An existing file is only replaced once the
    /// new one has been fully written.
    #[clap(long)]
    output: PathBuf,

    /// Base URL for the Grafcan sensor API
    #[clap(long, default_value = DEFAULT_API_URL)]
    api_url: Url,

    /// API key for the Grafcan sensor API
    #[clap(long, env = "GRAFCAN_TOKEN", hide_env_values = true)]
    api_token: String,

    /// Timeout for requests to the Grafcan API, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = StationRegistryApplication::parse();
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

    let client = GrafcanClient::new(http_client, opts.api_url.clone(), opts.api_token.clone());
    let rows = catalog::fetch_rows(&client).await.unwrap_or_else(|e| {
        tracing::error!(message = "unable to fetch stations", error = %e);
        process::exit(1)
    });

    if let Err(e) = catalog::write_file(&opts.output, &rows).await {
        tracing::error!(message = "unable to write stations file", path = %opts.output.display(), error = %e);
        process::exit(1)
    }

    tracing::info!(
        message = "wrote stations file",
        path = %opts.output.display(),
        stations = rows.len(),
        runtime_secs = startup.elapsed().as_secs_f64(),
    );

    Ok(())
}
