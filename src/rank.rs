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

//! Final ordering, truncation and row-to-hit assembly.

use std::cmp::Ordering;

use serde_json::Map;
use serde_json::Value;

use crate::model::CandidateRow;
use crate::model::Hit;
use crate::model::RankedResult;
use crate::model::RawMetadata;
use crate::plan::EntityKind;
use crate::plan::QueryPlan;
use crate::plan::SortKey;

/// Sorts by the plan's keys and truncates to its limit. The sort is stable,
/// so rows a backend already ordered stay as they are.
pub fn order_candidates(order: &[SortKey], rows: &mut Vec<CandidateRow>, limit: usize) {
    rows.sort_by(|a, b| compare(order, a, b));
    rows.truncate(limit);
}

fn compare(order: &[SortKey], a: &CandidateRow, b: &CandidateRow) -> Ordering {
    for key in order {
        let ord = match key {
            // present sorts first
            SortKey::MediaPresent => b.has_media().cmp(&a.has_media()),
            SortKey::NameAsc => a.name.cmp(&b.name),
            SortKey::DistanceAsc => a.distance.total_cmp(&b.distance),
            SortKey::IdAsc => a.id.cmp(&b.id),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Decodes metadata leniently. Anything that is not a JSON object after
/// decoding is treated as absent.
pub fn decode_metadata(raw: Option<&RawMetadata>) -> Option<Map<String, Value>> {
    let value = match raw? {
        RawMetadata::Json(value) => value.clone(),
        RawMetadata::Bytes(bytes) => {
            let text = std::str::from_utf8(bytes).ok()?;
            serde_json::from_str(text).ok()?
        }
        RawMetadata::Text(text) => serde_json::from_str(text).ok()?,
    };
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn display_name(kind: EntityKind, row: &CandidateRow) -> String {
    match kind {
        EntityKind::Airport => row.name.clone(),
        EntityKind::Airline => format!(
            "{} ({}/{})",
            row.name,
            row.iata.as_deref().unwrap_or(""),
            row.icao.as_deref().unwrap_or("")
        ),
    }
}

pub fn to_hit(kind: EntityKind, row: &CandidateRow) -> Hit {
    Hit {
        id: row.id,
        name: display_name(kind, row),
        city: row.city.clone(),
        country: row.country.clone(),
        url: row.media_url.as_deref().unwrap_or("").trim().to_string(),
        metadata: decode_metadata(row.metadata.as_ref()),
        distance: row.distance,
    }
}

pub fn assemble(plan: &QueryPlan, mut rows: Vec<CandidateRow>) -> RankedResult {
    order_candidates(plan.order(), &mut rows, plan.limit());
    let hits: Vec<Hit> = rows.iter().map(|row| to_hit(plan.target(), row)).collect();
    RankedResult {
        count: hits.len(),
        hits,
    }
}
