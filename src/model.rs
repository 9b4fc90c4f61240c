// Copyright 2026 SkyVision Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared row and result types.

use serde::Serialize;
use serde_json::Value;

/// Metadata as handed back by a storage backend, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMetadata {
    Json(Value),
    Bytes(Vec<u8>),
    Text(String),
}

/// One unranked record returned by storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub media_url: Option<String>,
    pub metadata: Option<RawMetadata>,
    pub distance: f64,
}

impl CandidateRow {
    pub fn has_media(&self) -> bool {
        self.media_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub url: String,
    pub metadata: Option<serde_json::Map<String, Value>>,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub count: usize,
    pub hits: Vec<Hit>,
}

/// Airport row as written by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct AirportRecord {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub image_url: Option<String>,
    pub metadata: Option<String>,
    pub embedding: Vec<f32>,
}

/// Airline row as written by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct AirlineRecord {
    pub id: i64,
    pub name: String,
    pub alias: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub callsign: Option<String>,
    pub country: Option<String>,
    pub active: Option<String>,
    pub logo_url: Option<String>,
    pub metadata: Option<String>,
    pub embedding: Vec<f32>,
}
