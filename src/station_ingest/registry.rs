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

use csv::{ReaderBuilder, Trim};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryLoadError {
    #[error("unable to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing identifier column {0:?}")]
    MissingColumn(String),
    #[error("empty station identifier on line {0}")]
    EmptyIdentifier(u64),
    #[error("duplicate station identifier {0}")]
    DuplicateIdentifier(StationId),
}

/// Unique identifier of a station.
///
/// Numeric identifiers sort before any others and compare as numbers (so "9" sorts
/// before "10"), the rest compare as text. Numeric ties (e.g. "7" and "007") fall back
/// to comparing the text so the ordering stays consistent with equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StationId(String);

impl StationId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        StationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key that is the same for identifiers naming the same station: numeric
    /// identifiers by value ("7" and "007" are one station), others by text.
    fn station_key(&self) -> String {
        match self.0.parse::<u64>() {
            Ok(v) => v.to_string(),
            Err(_) => self.0.clone(),
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for StationId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for StationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A row of the station registry: the identifier and every other column as metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    pub id: StationId,
    pub metadata: BTreeMap<String, String>,
}

impl StationRecord {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).map(String::as_str)
    }
}

/// Load the station registry CSV at `path`, see `load_stations_from_reader`.
pub fn load_stations<P: AsRef<Path>>(path: P, id_column: &str) -> Result<Vec<StationRecord>, RegistryLoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| RegistryLoadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_stations_from_reader(file, id_column)
}

/// Load station records from CSV with a header row, keyed by `id_column`.
///
/// Records are returned sorted ascending by identifier. A missing identifier column,
/// an empty identifier, or the same identifier appearing more than once is an error.
/// Numeric identifiers that differ only in leading zeros count as the same identifier.
pub fn load_stations_from_reader<R: Read>(
    reader: R,
    id_column: &str,
) -> Result<Vec<StationRecord>, RegistryLoadError> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let headers = reader.headers()?.clone();
    let id_index = headers
        .iter()
        .position(|h| h == id_column)
        .ok_or_else(|| RegistryLoadError::MissingColumn(id_column.to_owned()))?;

    let mut seen = HashSet::new();
    let mut stations = Vec::new();

    for result in reader.records() {
        let record = result?;
        let raw_id = record.get(id_index).unwrap_or_default();
        if raw_id.is_empty() {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(RegistryLoadError::EmptyIdentifier(line));
        }

        let id = StationId::new(raw_id);
        if !seen.insert(id.station_key()) {
            return Err(RegistryLoadError::DuplicateIdentifier(id));
        }

        let metadata = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(i, _)| *i != id_index)
            .map(|(_, (k, v))| (k.to_owned(), v.to_owned()))
            .collect();

        stations.push(StationRecord { id, metadata });
    }

    stations.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::debug!(message = "loaded station registry", stations = stations.len());
    Ok(stations)
}
