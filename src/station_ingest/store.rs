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

use crate::point::{FieldValue, ValidPoint};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use std::collections::BTreeMap;
use std::fmt::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("write rejected with status {0}: {1}")]
    Rejected(StatusCode, String),
}

/// Destination for sanitized points.
#[async_trait]
pub trait PointStore: Send + Sync {
    /// Write all `points` to `database`, each tagged with every entry of `tags`.
    async fn write_points(
        &self,
        database: &str,
        points: &[ValidPoint],
        tags: &BTreeMap<String, String>,
    ) -> Result<(), WriteError>;
}

/// Client for the InfluxDB 1.x HTTP write API.
#[derive(Debug)]
pub struct InfluxClient {
    client: Client,
    base_url: Url,
    credentials: Option<(String, String)>,
}

impl InfluxClient {
    const USER_AGENT: &'static str = concat!("station_ingest/", env!("CARGO_PKG_VERSION"));
    const LINE_PROTOCOL: &'static str = "text/plain; charset=utf-8";

    pub fn new(client: Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        InfluxClient {
            client,
            base_url,
            credentials: None,
        }
    }

    pub fn with_credentials<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn write_url(&self, database: &str) -> Result<Url, WriteError> {
        let mut url = self
            .base_url
            .join("write")
            .map_err(|e| WriteError::InvalidUrl(e.to_string()))?;

        url.query_pairs_mut()
            .append_pair("db", database)
            .append_pair("precision", "ns");
        Ok(url)
    }
}

#[async_trait]
impl PointStore for InfluxClient {
    async fn write_points(
        &self,
        database: &str,
        points: &[ValidPoint],
        tags: &BTreeMap<String, String>,
    ) -> Result<(), WriteError> {
        if points.is_empty() {
            tracing::debug!(message = "no points to write", database = database);
            return Ok(());
        }

        let url = self.write_url(database)?;
        let body = encode_points(points, tags);
        tracing::debug!(message = "making write request", url = %url, points = points.len(), num_bytes = body.len());

        let mut req = self
            .client
            .post(url)
            .header(USER_AGENT, Self::USER_AGENT)
            .header(CONTENT_TYPE, Self::LINE_PROTOCOL)
            .body(body);

        if let Some((username, password)) = &self.credentials {
            req = req.basic_auth(username, Some(password));
        }

        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = res.text().await.unwrap_or_default();
            Err(WriteError::Rejected(status, body.trim().to_owned()))
        }
    }
}

/// Encode points as InfluxDB line protocol, one line per point.
///
/// Tags are written in key order and tags with an empty value are left out since
/// InfluxDB does not accept them. Points without a time get no timestamp and are
/// assigned the server's time on write.
pub fn encode_points(points: &[ValidPoint], tags: &BTreeMap<String, String>) -> String {
    let mut buf = String::new();

    let mut tag_set = String::new();
    for (k, v) in tags.iter().filter(|(k, v)| !k.is_empty() && !v.is_empty()) {
        tag_set.push(',');
        tag_set.push_str(&escape(k, &[',', '=', ' ']));
        tag_set.push('=');
        tag_set.push_str(&escape(v, &[',', '=', ' ']));
    }

    for point in points {
        buf.push_str(&escape(point.measurement(), &[',', ' ']));
        buf.push_str(&tag_set);
        buf.push(' ');

        for (i, (k, v)) in point.fields().iter().enumerate() {
            if i > 0 {
                buf.push(',');
            }

            buf.push_str(&escape(k, &[',', '=', ' ']));
            buf.push('=');
            encode_value(&mut buf, v);
        }

        if let Some(nanos) = point.time().and_then(|t| t.timestamp_nanos_opt()) {
            let _ = write!(buf, " {}", nanos);
        }

        buf.push('\n');
    }

    buf
}

fn encode_value(buf: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Boolean(b) => {
            let _ = write!(buf, "{}", b);
        }
        FieldValue::Float(v) => {
            let _ = write!(buf, "{:?}", v);
        }
        FieldValue::Integer(v) => {
            let _ = write!(buf, "{}i", v);
        }
        FieldValue::Text(s) => {
            buf.push('"');
            buf.push_str(&escape(s, &['"', '\\']));
            buf.push('"');
        }
    }
}

/// Escape `special` characters with a backslash. Line breaks can't be escaped in line
/// protocol and would end the point early, so they are written as spaces (and escaped
/// if a space is special).
fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = if c == '\n' || c == '\r' { ' ' } else { c };
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{encode_points, InfluxClient};
    use crate::point::{FieldValue, ValidPoint};
    use chrono::{TimeZone, Utc};
    use reqwest::{Client, Url};
    use std::collections::BTreeMap;

    fn point(measurement: &str, fields: &[(&str, FieldValue)], with_time: bool) -> ValidPoint {
        let time = if with_time {
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        } else {
            None
        };

        let fields = fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        ValidPoint::new(measurement, time, fields).unwrap()
    }

    #[test]
    fn test_encode_single_point() {
        let points = vec![point("plaza_de_espana_centro", &[("temp", FieldValue::Float(21.5))], true)];
        let mut tags = BTreeMap::new();
        tags.insert("locations_name".to_owned(), "Plaza de España (Centro)".to_owned());
        tags.insert("location_latitude".to_owned(), "28.46".to_owned());

        assert_eq!(
            "plaza_de_espana_centro,location_latitude=28.46,locations_name=Plaza\\ de\\ España\\ (Centro) temp=21.5 1714557600000000000\n",
            encode_points(&points, &tags)
        );
    }

    #[test]
    fn test_encode_field_types() {
        let points = vec![point(
            "m",
            &[
                ("a", FieldValue::Float(3.0)),
                ("b", FieldValue::Boolean(true)),
                ("c", FieldValue::Text("say \"hi\" \\o/".to_owned())),
            ],
            false,
        )];

        assert_eq!(
            "m a=3.0,b=true,c=\"say \\\"hi\\\" \\\\o/\"\n",
            encode_points(&points, &BTreeMap::new())
        );
    }

    #[test]
    fn test_encode_skips_empty_tags() {
        let points = vec![point("m", &[("a", FieldValue::Float(1.5))], false)];
        let mut tags = BTreeMap::new();
        tags.insert("description".to_owned(), String::new());
        tags.insert("name".to_owned(), "a,b=c".to_owned());

        assert_eq!("m,name=a\\,b\\=c a=1.5\n", encode_points(&points, &tags));
    }

    #[test]
    fn test_encode_escapes_keys_and_measurement() {
        let points = vec![point("my m,x", &[("wind speed", FieldValue::Float(2.0))], false)];

        assert_eq!("my\\ m\\,x wind\\ speed=2.0\n", encode_points(&points, &BTreeMap::new()));
    }

    #[test]
    fn test_encode_integer() {
        let points = vec![point("task_status", &[("stations_written", FieldValue::Integer(12))], false)];

        assert_eq!("task_status stations_written=12i\n", encode_points(&points, &BTreeMap::new()));
    }

    #[test]
    fn test_encode_line_breaks() {
        let points = vec![point(
            "m\nx",
            &[
                ("wind\r\nspeed", FieldValue::Float(2.0)),
                ("note", FieldValue::Text("first\nsecond".to_owned())),
            ],
            false,
        )];
        let mut tags = BTreeMap::new();
        tags.insert("things_description".to_owned(), "Estación\r\nmeteorológica".to_owned());

        let encoded = encode_points(&points, &tags);

        assert_eq!(1, encoded.lines().count());
        assert!(!encoded.contains('\r'));
        assert_eq!(
            "m\\ x,things_description=Estación\\ \\ meteorológica note=\"first second\",wind\\ \\ speed=2.0\n",
            encoded
        );
    }

    #[test]
    fn test_encode_no_points() {
        assert_eq!("", encode_points(&[], &BTreeMap::new()));
    }

    #[test]
    fn test_write_url() {
        let client = InfluxClient::new(Client::new(), Url::parse("http://localhost:8086").unwrap());
        let url = client.write_url("grafcan db").unwrap();

        assert_eq!("http://localhost:8086/write?db=grafcan+db&precision=ns", url.as_str());
    }
}
