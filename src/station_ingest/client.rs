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

use crate::catalog::{CatalogSource, Location, Page, Thing};
use crate::point::{FieldValue, RawPoint};
use crate::registry::StationId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("unknown station {0}")]
    UnknownStation(StationId),
    #[error("no observations available for station {0}")]
    NoData(StationId),
    #[error("malformed observations for station {0}: {1}")]
    Malformed(StationId, String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unexpected status {0} for {1}")]
    Unexpected(StatusCode, Url),
}

/// Source of the most recent observation of a station.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn last_observation(&self, station: &StationId) -> Result<Vec<RawPoint>, FetchError>;
}

/// Client for the Grafcan sensor network API (sensores.grafcan.es).
#[derive(Debug)]
pub struct GrafcanClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl GrafcanClient {
    const USER_AGENT: &'static str = concat!("station_ingest/", env!("CARGO_PKG_VERSION"));
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new<S: Into<String>>(client: Client, mut base_url: Url, api_key: S) -> Self {
        // Relative joins only append to base URLs ending with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        GrafcanClient {
            client,
            base_url,
            api_key: api_key.into(),
        }
    }

    pub async fn observations(&self, station: &StationId) -> Result<ObservationsLast, FetchError> {
        let request_url = self.observation_url(station)?;
        tracing::debug!(message = "making latest observation request", url = %request_url);

        let res = self.make_request(station, request_url).await?;
        Ok(res.json::<ObservationsLast>().await?)
    }

    async fn make_request(&self, station: &StationId, url: Url) -> Result<Response, FetchError> {
        let res = self.send(url.clone()).await?;
        let status = res.status();
        if status == StatusCode::OK {
            Ok(res)
        } else if status == StatusCode::NOT_FOUND {
            Err(FetchError::UnknownStation(station.clone()))
        } else {
            Err(FetchError::Unexpected(status, url))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        tracing::debug!(message = "making catalog request", url = %url);
        let res = self.send(url.clone()).await?;
        let status = res.status();
        if status == StatusCode::OK {
            Ok(res.json::<T>().await?)
        } else {
            Err(FetchError::Unexpected(status, url))
        }
    }

    async fn send(&self, url: Url) -> Result<Response, reqwest::Error> {
        self.client
            .get(url)
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .header(AUTHORIZATION, format!("Api-Key {}", self.api_key))
            .send()
            .await
    }

    fn observation_url(&self, station: &StationId) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join("observations_last/")
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let encoded_station = utf8_percent_encode(station.as_str(), NON_ALPHANUMERIC);
        url.set_query(Some(&format!("thing={}", encoded_station)));
        Ok(url)
    }
}

#[async_trait]
impl ObservationSource for GrafcanClient {
    async fn last_observation(&self, station: &StationId) -> Result<Vec<RawPoint>, FetchError> {
        let res = self.observations(station).await?;
        tracing::debug!(
            message = "fetched latest observations",
            station = %station,
            count = res.observations.len(),
        );

        pivot_observations(station, res.observations)
    }
}

#[async_trait]
impl CatalogSource for GrafcanClient {
    async fn things(&self) -> Result<Vec<Thing>, FetchError> {
        let mut url = self
            .base_url
            .join("things/")
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let mut things = Vec::new();

        loop {
            let page: Page<Thing> = self.get_json(url.clone()).await?;
            things.extend(page.results);

            match page.next {
                Some(next) => {
                    let next = Url::parse(&next).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", next, e)))?;
                    if next == url {
                        break;
                    }
                    url = next;
                }
                None => break,
            }
        }

        tracing::debug!(message = "fetched things", count = things.len());
        Ok(things)
    }

    async fn location(&self, location_url: &str) -> Result<Location, FetchError> {
        let url = Url::parse(location_url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", location_url, e)))?;
        self.get_json(url).await
    }
}

/// Turn a list of per-metric observations into one point per distinct result time.
///
/// Each metric becomes a field named after its name and unit. A point gets a `None`
/// field for any metric that was only reported at other times.
pub fn pivot_observations(station: &StationId, observations: Vec<SensorObservation>) -> Result<Vec<RawPoint>, FetchError> {
    if observations.is_empty() {
        return Err(FetchError::NoData(station.clone()));
    }

    let mut columns = BTreeSet::new();
    let mut rows: BTreeMap<DateTime<Utc>, BTreeMap<String, Option<FieldValue>>> = BTreeMap::new();

    for obs in observations {
        let time = DateTime::parse_from_rfc3339(&obs.result_time)
            .map_err(|e| FetchError::Malformed(station.clone(), format!("result time {:?}: {}", obs.result_time, e)))?
            .with_timezone(&Utc);

        let column = field_name(&obs.name, obs.unit.as_deref().unwrap_or_default());
        let row = rows.entry(time).or_default();
        if row.contains_key(&column) {
            return Err(FetchError::Malformed(
                station.clone(),
                format!("duplicate value for {} at {}", column, obs.result_time),
            ));
        }

        row.insert(column.clone(), obs.value);
        columns.insert(column);
    }

    Ok(rows
        .into_iter()
        .map(|(time, mut fields)| {
            for column in &columns {
                fields.entry(column.clone()).or_insert(None);
            }

            RawPoint {
                time: Some(time),
                fields,
            }
        })
        .collect())
}

/// Field name for a metric: name and unit joined with an underscore, lowercased, with
/// spaces turned into underscores and dots, parentheses and degree signs removed. Accents
/// are kept so field names stay the same as the ones already stored.
pub fn field_name(name: &str, unit: &str) -> String {
    format!("{}_{}", name, unit)
        .to_lowercase()
        .replace(' ', "_")
        .replace(|c: char| matches!(c, '.' | '(' | ')' | '°'), "")
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ObservationsLast {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub observations: Vec<SensorObservation>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SensorObservation {
    pub name: String,
    pub value: Option<FieldValue>,
    #[serde(rename = "unitOfMeasurement")]
    pub unit: Option<String>,
    #[serde(rename = "resultTime")]
    pub result_time: String,
}
