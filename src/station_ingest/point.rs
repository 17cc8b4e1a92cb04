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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value of a single observed field.
///
/// Numbers from the observation API are always read as `Float` so a field keeps
/// the same type in InfluxDB whether or not a value happens to be whole. `Integer`
/// is for values produced locally, such as counts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Float(f64),
    #[serde(skip_deserializing)]
    Integer(i64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Float(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Observation for a station as returned by an `ObservationSource`. Any field
/// may be missing a value (`None`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPoint {
    pub time: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, Option<FieldValue>>,
}

impl RawPoint {
    pub fn new(time: Option<DateTime<Utc>>) -> Self {
        RawPoint {
            time,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field<S, V>(mut self, name: S, value: Option<V>) -> Self
    where
        S: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields.insert(name.into(), value.map(Into::into));
        self
    }
}

/// Observation ready to be written: it belongs to a measurement (category) and has
/// at least one field, none of which are null.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPoint {
    measurement: String,
    time: Option<DateTime<Utc>>,
    fields: BTreeMap<String, FieldValue>,
}

impl ValidPoint {
    /// Create a new point, returning `None` if there are no fields.
    pub fn new<S: Into<String>>(
        measurement: S,
        time: Option<DateTime<Utc>>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }

        Some(ValidPoint {
            measurement: measurement.into(),
            time,
            fields,
        })
    }

    /// Create a point with a single field, which is always valid.
    pub fn single<S, F, V>(measurement: S, time: Option<DateTime<Utc>>, name: F, value: V) -> Self
    where
        S: Into<String>,
        F: Into<String>,
        V: Into<FieldValue>,
    {
        let mut fields = BTreeMap::new();
        fields.insert(name.into(), value.into());

        ValidPoint {
            measurement: measurement.into(),
            time,
            fields,
        }
    }

    pub fn with_field<F, V>(mut self, name: F, value: V) -> Self
    where
        F: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }
}

/// Attach `category` to each point and remove fields without a value.
///
/// Points that have no fields left afterwards are dropped. The relative order of the
/// remaining points is preserved. Input points are not modified.
pub fn sanitize(points: &[RawPoint], category: &str) -> Vec<ValidPoint> {
    points
        .iter()
        .filter_map(|p| {
            let fields = p
                .fields
                .iter()
                .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
                .collect();

            ValidPoint::new(category, p.time, fields)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{sanitize, FieldValue, RawPoint, ValidPoint};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn test_sanitize_removes_null_fields() {
        let points = vec![RawPoint::new(None)
            .with_field("temp", Some(21.5))
            .with_field::<_, f64>("humidity", None)];

        let res = sanitize(&points, "plaza_de_espana_centro");

        assert_eq!(1, res.len());
        assert_eq!("plaza_de_espana_centro", res[0].measurement());
        assert_eq!(1, res[0].fields().len());
        assert_eq!(Some(&FieldValue::Float(21.5)), res[0].fields().get("temp"));
    }

    #[test]
    fn test_sanitize_drops_all_null_point() {
        let points = vec![RawPoint::new(None).with_field::<_, f64>("temp", None)];
        assert!(sanitize(&points, "somewhere").is_empty());
    }

    #[test]
    fn test_sanitize_drops_point_without_fields() {
        let points = vec![RawPoint::new(None)];
        assert!(sanitize(&points, "somewhere").is_empty());
    }

    #[test]
    fn test_sanitize_keeps_zero_and_empty_text() {
        let points = vec![RawPoint::new(None)
            .with_field("rain", Some(0.0))
            .with_field("note", Some(""))
            .with_field("online", Some(false))];

        let res = sanitize(&points, "somewhere");

        assert_eq!(1, res.len());
        assert_eq!(3, res[0].fields().len());
    }

    #[test]
    fn test_sanitize_preserves_order_and_time() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 10, 0).unwrap();
        let t3 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 20, 0).unwrap();
        let points = vec![
            RawPoint::new(Some(t1)).with_field("temp", Some(20.0)),
            RawPoint::new(Some(t2)).with_field::<_, f64>("temp", None),
            RawPoint::new(Some(t3)).with_field("temp", Some(22.0)),
        ];

        let res = sanitize(&points, "");
        let times: Vec<_> = res.iter().map(|p| p.time()).collect();

        assert_eq!(vec![Some(t1), Some(t3)], times);
        assert!(res.iter().all(|p| p.measurement().is_empty()));
    }

    #[test]
    fn test_sanitize_does_not_modify_input() {
        let points = vec![RawPoint::new(None)
            .with_field("temp", Some(1.0))
            .with_field::<_, f64>("wind", None)];
        let before = points.clone();

        let _ = sanitize(&points, "x");

        assert_eq!(before, points);
    }

    #[test]
    fn test_valid_point_requires_fields() {
        assert!(ValidPoint::new("x", None, BTreeMap::new()).is_none());
    }

    #[test]
    fn test_valid_point_single() {
        let point = ValidPoint::single("m", None, "a", 1i64).with_field("b", "x");

        assert_eq!("m", point.measurement());
        assert_eq!(Some(&FieldValue::Integer(1)), point.fields().get("a"));
        assert_eq!(Some(&FieldValue::Text("x".to_owned())), point.fields().get("b"));
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!("21.5", FieldValue::from(21.5).to_string());
        assert_eq!("42", FieldValue::from(42i64).to_string());
        assert_eq!("true", FieldValue::from(true).to_string());
        assert_eq!("NE", FieldValue::from("NE").to_string());
    }

    #[test]
    fn test_field_value_deserialize() {
        let values: Vec<Option<FieldValue>> = serde_json::from_str(r#"[1.5, 3, "N", true, null]"#).unwrap();
        assert_eq!(
            vec![
                Some(FieldValue::Float(1.5)),
                Some(FieldValue::Float(3.0)),
                Some(FieldValue::Text("N".to_owned())),
                Some(FieldValue::Boolean(true)),
                None,
            ],
            values
        );
    }
}
