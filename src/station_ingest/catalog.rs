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

use crate::client::FetchError;
use crate::normalize::plain_text;
use crate::point::FieldValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    Fetch(#[from] FetchError),
    #[error("no stations returned by the API")]
    NoStations,
    #[error("none of the {0} stations have a usable location")]
    NoLocations(usize),
    #[error("unable to encode stations: {0}")]
    Csv(#[from] csv::Error),
    #[error("unable to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Source of station ("thing") and location metadata.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Every station known to the API.
    async fn things(&self) -> Result<Vec<Thing>, FetchError>;

    /// The location at `url`, as referenced by a station's `location_set`.
    async fn location(&self, url: &str) -> Result<Location, FetchError>;
}

/// One page of a paginated API listing.
#[derive(Serialize, Deserialize, Debug)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Thing {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Option<ThingProperties>,
    #[serde(default)]
    pub location_set: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ThingProperties {
    #[serde(default)]
    pub main_purpose: Option<FieldValue>,
    #[serde(default)]
    pub serial_number: Option<FieldValue>,
    #[serde(default)]
    pub anemometer_height: Option<FieldValue>,
    #[serde(default)]
    pub geonica_teletrans_id: Option<FieldValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Location {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<Geometry>,
}

/// GeoJSON geometry of a location, coordinates are `[longitude, latitude]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Geometry {
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

/// A row of the stations file. Column names match what the ingest expects by
/// default: `things_id` for the identifier and `locations_name` for the location.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StationRow {
    pub things_id: u64,
    pub things_name: String,
    pub things_description: String,
    pub things_main_purpose: String,
    pub things_serial_number: String,
    pub things_anemometer_height: String,
    pub things_geonica_teletrans_id: String,
    pub locations_id: u64,
    pub locations_name: String,
    pub locations_description: String,
    pub locations_longitude: Option<f64>,
    pub locations_latitude: Option<f64>,
}

impl StationRow {
    /// Combine a station and its location. Text is reduced to plain characters
    /// (accents and control characters removed).
    pub fn new(thing: &Thing, location: &Location) -> Self {
        let props = thing.properties.clone().unwrap_or_default();
        let (longitude, latitude) = match location.location.as_ref().map(|g| g.coordinates.as_slice()) {
            Some([lon, lat, ..]) => (Some(*lon), Some(*lat)),
            _ => (None, None),
        };

        StationRow {
            things_id: thing.id,
            things_name: plain_text(&thing.name),
            things_description: text(thing.description.as_deref()),
            things_main_purpose: property(props.main_purpose),
            things_serial_number: property(props.serial_number),
            things_anemometer_height: property(props.anemometer_height),
            things_geonica_teletrans_id: property(props.geonica_teletrans_id),
            locations_id: location.id,
            locations_name: plain_text(&location.name),
            locations_description: text(location.description.as_deref()),
            locations_longitude: longitude,
            locations_latitude: latitude,
        }
    }
}

fn text(s: Option<&str>) -> String {
    s.map(plain_text).unwrap_or_default()
}

fn property(v: Option<FieldValue>) -> String {
    v.map(|v| plain_text(&v.to_string())).unwrap_or_default()
}

/// Fetch every station and its location and build the rows of the stations file.
///
/// Stations without exactly one location, or whose location can't be fetched, are
/// logged and left out. Rows are sorted by station identifier.
pub async fn fetch_rows<S: CatalogSource + ?Sized>(source: &S) -> Result<Vec<StationRow>, CatalogError> {
    let things = source.things().await?;
    if things.is_empty() {
        return Err(CatalogError::NoStations);
    }

    tracing::info!(message = "found stations", stations = things.len());
    let mut rows = Vec::with_capacity(things.len());

    for thing in &things {
        let url = match thing.location_set.as_slice() {
            [url] => url,
            [] => {
                tracing::warn!(message = "station has no location, skipping", station = thing.id);
                continue;
            }
            urls => {
                tracing::warn!(
                    message = "station has more than one location, skipping",
                    station = thing.id,
                    locations = urls.len(),
                );
                continue;
            }
        };

        match source.location(url).await {
            Ok(location) => rows.push(StationRow::new(thing, &location)),
            Err(e) => tracing::warn!(message = "failed to fetch location, skipping", station = thing.id, url = %url, error = %e),
        }
    }

    if rows.is_empty() {
        return Err(CatalogError::NoLocations(things.len()));
    }

    rows.sort_by_key(|r| r.things_id);
    Ok(rows)
}

/// Write rows as CSV with a header row.
pub fn write_rows<W: io::Write>(writer: W, rows: &[StationRow]) -> Result<(), CatalogError> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }

    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Write rows as CSV to `path`, replacing the file only once it has been fully written.
pub async fn write_file(path: &Path, rows: &[StationRow]) -> Result<(), CatalogError> {
    let mut buf = Vec::new();
    write_rows(&mut buf, rows)?;

    let tmp = path.with_extension("tmp");
    let io_err = |source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    };

    tokio::fs::write(&tmp, &buf).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    tracing::debug!(message = "wrote stations file", path = %path.display(), num_bytes = buf.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{fetch_rows, write_file, write_rows, CatalogError, CatalogSource, Location, Page, StationRow, Thing};
    use crate::client::FetchError;
    use crate::registry::load_stations_from_reader;
    use async_trait::async_trait;
    use reqwest::{StatusCode, Url};
    use std::collections::HashMap;

    const THINGS: &str = r#"{
        "count": 3,
        "next": null,
        "results": [
            {
                "id": 12,
                "name": "Estación Güímar",
                "description": "Estación meteorológica",
                "properties": {"main_purpose": "Meteorología", "serial_number": 4501, "anemometer_height": 10.5},
                "location_set": ["https://sensores.grafcan.es/api/v1.0/locations/120/"]
            },
            {
                "id": 7,
                "name": "Estación Santa Cruz",
                "description": null,
                "properties": null,
                "location_set": ["https://sensores.grafcan.es/api/v1.0/locations/70/"]
            },
            {
                "id": 9,
                "name": "Estación móvil",
                "description": "",
                "properties": {},
                "location_set": [
                    "https://sensores.grafcan.es/api/v1.0/locations/90/",
                    "https://sensores.grafcan.es/api/v1.0/locations/91/"
                ]
            }
        ]
    }"#;

    const LOCATION: &str = r#"{
        "id": 120,
        "name": "Güímar, Puertito",
        "description": "Muelle",
        "location": {"type": "Point", "coordinates": [-16.3731, 28.2960]}
    }"#;

    fn location(id: u64, name: &str) -> Location {
        Location {
            id,
            name: name.to_owned(),
            description: None,
            location: None,
        }
    }

    struct FakeCatalog {
        things: Vec<Thing>,
        locations: HashMap<String, Location>,
    }

    #[async_trait]
    impl CatalogSource for FakeCatalog {
        async fn things(&self) -> Result<Vec<Thing>, FetchError> {
            Ok(self.things.clone())
        }

        async fn location(&self, url: &str) -> Result<Location, FetchError> {
            self.locations.get(url).cloned().ok_or_else(|| {
                FetchError::Unexpected(StatusCode::NOT_FOUND, Url::parse(url).unwrap())
            })
        }
    }

    fn catalog() -> FakeCatalog {
        let page: Page<Thing> = serde_json::from_str(THINGS).unwrap();
        let mut locations = HashMap::new();
        locations.insert(
            "https://sensores.grafcan.es/api/v1.0/locations/120/".to_owned(),
            serde_json::from_str(LOCATION).unwrap(),
        );
        locations.insert(
            "https://sensores.grafcan.es/api/v1.0/locations/70/".to_owned(),
            location(70, "Plaza de España (Centro)"),
        );

        FakeCatalog {
            things: page.results,
            locations,
        }
    }

    #[test]
    fn test_station_row() {
        let page: Page<Thing> = serde_json::from_str(THINGS).unwrap();
        let loc: Location = serde_json::from_str(LOCATION).unwrap();

        let row = StationRow::new(&page.results[0], &loc);

        assert_eq!(12, row.things_id);
        assert_eq!("Estacion Guimar", row.things_name);
        assert_eq!("Estacion meteorologica", row.things_description);
        assert_eq!("Meteorologia", row.things_main_purpose);
        assert_eq!("4501", row.things_serial_number);
        assert_eq!("10.5", row.things_anemometer_height);
        assert_eq!("", row.things_geonica_teletrans_id);
        assert_eq!(120, row.locations_id);
        assert_eq!("Guimar, Puertito", row.locations_name);
        assert_eq!(Some(-16.3731), row.locations_longitude);
        assert_eq!(Some(28.2960), row.locations_latitude);
    }

    #[test]
    fn test_station_row_missing_values() {
        let page: Page<Thing> = serde_json::from_str(THINGS).unwrap();
        let row = StationRow::new(&page.results[1], &location(70, "Santa Cruz"));

        assert_eq!("", row.things_description);
        assert_eq!("", row.things_main_purpose);
        assert_eq!(None, row.locations_longitude);
        assert_eq!(None, row.locations_latitude);
    }

    #[tokio::test]
    async fn test_fetch_rows_skips_stations_without_single_location() {
        let rows = fetch_rows(&catalog()).await.unwrap();
        let ids: Vec<u64> = rows.iter().map(|r| r.things_id).collect();

        assert_eq!(vec![7, 12], ids);
        assert_eq!("Plaza de Espana (Centro)", rows[0].locations_name);
    }

    #[tokio::test]
    async fn test_fetch_rows_skips_failed_location() {
        let mut catalog = catalog();
        catalog.locations.remove("https://sensores.grafcan.es/api/v1.0/locations/70/");

        let rows = fetch_rows(&catalog).await.unwrap();

        assert_eq!(1, rows.len());
        assert_eq!(12, rows[0].things_id);
    }

    #[tokio::test]
    async fn test_fetch_rows_no_stations() {
        let catalog = FakeCatalog {
            things: Vec::new(),
            locations: HashMap::new(),
        };

        assert!(matches!(fetch_rows(&catalog).await, Err(CatalogError::NoStations)));
    }

    #[tokio::test]
    async fn test_fetch_rows_no_locations() {
        let mut catalog = catalog();
        catalog.locations.clear();

        assert!(matches!(fetch_rows(&catalog).await, Err(CatalogError::NoLocations(3))));
    }

    #[tokio::test]
    async fn test_written_rows_load_as_stations() {
        let rows = fetch_rows(&catalog()).await.unwrap();
        let mut buf = Vec::new();
        write_rows(&mut buf, &rows).unwrap();

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("things_id,things_name,things_description,"), "{}", text);

        let stations = load_stations_from_reader(buf.as_slice(), "things_id").unwrap();
        assert_eq!(2, stations.len());
        assert_eq!("7", stations[0].id.as_str());
        assert_eq!(Some("Guimar, Puertito"), stations[1].attribute("locations_name"));
        assert_eq!(Some("28.296"), stations[1].attribute("locations_latitude"));
        assert_eq!(Some(""), stations[0].attribute("locations_latitude"));
    }

    #[tokio::test]
    async fn test_write_file() {
        let rows = fetch_rows(&catalog()).await.unwrap();
        let dir = std::env::temp_dir().join(format!("station_ingest_catalog_{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("stations.csv");

        write_file(&path, &rows).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();

        assert_eq!(3, contents.lines().count());
        assert!(!dir.join("stations.tmp").exists());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
