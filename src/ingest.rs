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

use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use tracing::info;
use walkdir::WalkDir;

use crate::config::Config;
use crate::embed::EmbeddingProvider;
use crate::embed::validate_dim;
use crate::model::AirlineRecord;
use crate::model::AirportRecord;
use crate::output::StatsOut;
use crate::store::Store;

const DEFAULT_GLOB: &str = "**/*.jsonl";

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub glob: Option<String>,
    pub ignore: Vec<String>,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub files: usize,
    pub airports: usize,
    pub airlines: usize,
    pub embedded: usize,
    pub took_ms: i64,
    pub warnings: Vec<String>,
}

impl IngestReport {
    pub fn stats(&self) -> StatsOut {
        StatsOut {
            took_ms: self.took_ms,
            total_hits: (self.airports + self.airlines) as i64,
            airport_count: Some(self.airports as i64),
            airline_count: Some(self.airlines as i64),
            ..StatsOut::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Tags {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawAirport {
    id: i64,
    name: Option<String>,
    city: Option<String>,
    country: Option<String>,
    iata: Option<String>,
    icao: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    image_url: Option<String>,
    style: Option<String>,
    tags: Option<Tags>,
    license: Option<String>,
    attribution: Option<String>,
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct RawAirline {
    id: i64,
    name: Option<String>,
    alias: Option<String>,
    iata: Option<String>,
    icao: Option<String>,
    callsign: Option<String>,
    country: Option<String>,
    active: Option<String>,
    logo_url: Option<String>,
    style: Option<String>,
    tags: Option<Tags>,
    license: Option<String>,
    attribution: Option<String>,
    embedding: Option<Vec<f32>>,
}

enum Record {
    Airport(AirportRecord),
    Airline(AirlineRecord),
}

/// Loads JSONL files (or directories of them) into the store in a single
/// transaction. Any invalid line aborts the whole load.
pub fn ingest_paths(
    store: &Store,
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    paths: Vec<PathBuf>,
    opts: IngestOptions,
) -> Result<IngestReport> {
    let started = Instant::now();
    let include_set = build_globset(opts.glob.as_deref().unwrap_or(DEFAULT_GLOB))?;
    let ignore_set = build_ignore_set(&opts.ignore)?;

    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            if !ignore_set.is_match(&path) {
                files.push(path);
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let candidate = entry.path();
                if entry.file_type().is_file()
                    && include_set.is_match(candidate)
                    && !ignore_set.is_match(candidate)
                {
                    files.push(candidate.to_path_buf());
                }
            }
        } else {
            anyhow::bail!("path not found: {}", path.display());
        }
    }

    let mut report = IngestReport::default();
    let tx = store
        .conn
        .unchecked_transaction()
        .context("begin load transaction")?;
    for file in &files {
        ingest_file(store, config, embedder, file, &mut report)?;
        report.files += 1;
    }
    let loaded_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format load time")?;
    store.record_load(&loaded_at)?;
    tx.commit().context("commit load transaction")?;

    report.took_ms = started.elapsed().as_millis() as i64;
    info!(
        files = report.files,
        airports = report.airports,
        airlines = report.airlines,
        embedded = report.embedded,
        "load complete"
    );
    Ok(report)
}

fn build_globset(pattern: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(pattern).with_context(|| format!("invalid glob {pattern}"))?);
    Ok(builder.build()?)
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat).with_context(|| format!("invalid glob {pat}"))?);
    }
    Ok(builder.build()?)
}

fn ingest_file(
    store: &Store,
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    path: &Path,
    report: &mut IngestReport,
) -> Result<()> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    debug!(path = %path.display(), "load file");
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_line(line, config, embedder, report)
            .with_context(|| format!("{}: line {line_no}", path.display()))?;
        match record {
            Some(Record::Airport(record)) => {
                store.upsert_airport(&record)?;
                report.airports += 1;
            }
            Some(Record::Airline(record)) => {
                store.upsert_airline(&record)?;
                report.airlines += 1;
            }
            None => report.warnings.push(format!(
                "{}: line {line_no}: skipped record without a known type",
                path.display()
            )),
        }
    }
    Ok(())
}

fn parse_line(
    line: &str,
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    report: &mut IngestReport,
) -> Result<Option<Record>> {
    let value: Value = serde_json::from_str(line).context("invalid JSON")?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_lowercase);
    let base_url = config.public_base_url.as_deref();
    match kind.as_deref() {
        Some("airport") => {
            let raw: RawAirport = serde_json::from_value(value).context("invalid airport")?;
            let name = required_name(raw.name)?;
            let city = none_if_blank(raw.city);
            let country = none_if_blank(raw.country);
            let embedding = match raw.embedding {
                Some(vec) => vec,
                None => {
                    report.embedded += 1;
                    let prompt = airport_prompt(&name, city.as_deref(), country.as_deref());
                    embedder.embed_text(&prompt)?
                }
            };
            let embedding = finite_or_zero(embedding);
            validate_dim(&embedding, config.embedding_dim, "airport")?;
            Ok(Some(Record::Airport(AirportRecord {
                id: raw.id,
                name,
                city,
                country,
                iata: none_if_blank(raw.iata),
                icao: none_if_blank(raw.icao),
                latitude: raw.latitude,
                longitude: raw.longitude,
                image_url: normalize_url(raw.image_url.as_deref(), base_url),
                metadata: build_metadata(raw.style, raw.tags, raw.license, raw.attribution),
                embedding,
            })))
        }
        Some("airline") => {
            let raw: RawAirline = serde_json::from_value(value).context("invalid airline")?;
            let name = required_name(raw.name)?;
            let country = none_if_blank(raw.country);
            let embedding = match raw.embedding {
                Some(vec) => vec,
                None => {
                    report.embedded += 1;
                    embedder.embed_text(&airline_prompt(&name, country.as_deref()))?
                }
            };
            let embedding = finite_or_zero(embedding);
            validate_dim(&embedding, config.embedding_dim, "airline")?;
            Ok(Some(Record::Airline(AirlineRecord {
                id: raw.id,
                name,
                alias: none_if_blank(raw.alias),
                iata: none_if_blank(raw.iata),
                icao: none_if_blank(raw.icao),
                callsign: none_if_blank(raw.callsign),
                country,
                active: none_if_blank(raw.active),
                logo_url: normalize_url(raw.logo_url.as_deref(), base_url),
                metadata: build_metadata(raw.style, raw.tags, raw.license, raw.attribution),
                embedding,
            })))
        }
        _ => Ok(None),
    }
}

fn required_name(name: Option<String>) -> Result<String> {
    none_if_blank(name).ok_or_else(|| anyhow::anyhow!("record has no name"))
}

fn none_if_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn finite_or_zero(mut vec: Vec<f32>) -> Vec<f32> {
    for v in &mut vec {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
    vec
}

pub fn airport_prompt(name: &str, city: Option<&str>, country: Option<&str>) -> String {
    let parts: Vec<&str> = [Some(name), city, country]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();
    format!(
        "{}. airport, architecture, travel, terminals, runways.",
        parts.join(", ")
    )
}

pub fn airline_prompt(name: &str, country: Option<&str>) -> String {
    format!(
        "{name} airline logo, brand identity, typography, colors, {}",
        country.unwrap_or("")
    )
}

/// Makes relative media URLs absolute against `base` when one is set.
pub fn normalize_url(url: Option<&str>, base: Option<&str>) -> Option<String> {
    let url = url.map(str::trim).filter(|u| !u.is_empty())?;
    if url.starts_with("http://") || url.starts_with("https://") {
        return Some(url.to_string());
    }
    let Some(base) = base.map(str::trim).filter(|b| !b.is_empty()) else {
        return Some(url.to_string());
    };
    let base = base.trim_end_matches('/');
    if url.starts_with('/') {
        Some(format!("{base}{url}"))
    } else {
        Some(format!("{base}/{url}"))
    }
}

/// Metadata JSON from the descriptive fields, or `None` when all are empty.
fn build_metadata(
    style: Option<String>,
    tags: Option<Tags>,
    license: Option<String>,
    attribution: Option<String>,
) -> Option<String> {
    let mut map = Map::new();
    if let Some(style) = none_if_blank(style) {
        map.insert("style".to_string(), Value::String(style));
    }
    let tags: Vec<String> = match tags {
        Some(Tags::Text(text)) => text.split(',').map(str::to_string).collect(),
        Some(Tags::List(items)) => items,
        None => Vec::new(),
    };
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    if !tags.is_empty() {
        map.insert(
            "tags".to_string(),
            Value::Array(tags.into_iter().map(Value::String).collect()),
        );
    }
    if let Some(license) = none_if_blank(license) {
        map.insert("license".to_string(), Value::String(license));
    }
    if let Some(attribution) = none_if_blank(attribution) {
        map.insert("attribution".to_string(), Value::String(attribution));
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map).to_string())
    }
}
