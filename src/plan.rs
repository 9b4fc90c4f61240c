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

//! Query planning: turns an analyzed query, caller filters and an optional
//! query vector into an immutable [`QueryPlan`].
//!
//! The plan is backend-neutral. Rendering to SQL lives in `sql.rs`; the
//! planner never produces query text itself.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::analyze::AnalyzedQuery;
use crate::error::SearchError;
use crate::error::SearchResult;

/// Filter keys the planner understands. Anything else is ignored.
pub const RECOGNIZED_FILTER_KEYS: [&str; 5] =
    ["country", "city", "style", "has_image", "has_logo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Airport,
    Airline,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Airport => "airport",
            EntityKind::Airline => "airline",
        }
    }

    /// Column holding the entity's display image.
    pub fn media(self) -> Attribute {
        match self {
            EntityKind::Airport => Attribute::ImageUrl,
            EntityKind::Airline => Attribute::LogoUrl,
        }
    }

    pub fn supports(self, attribute: Attribute) -> bool {
        match self {
            EntityKind::Airport => !matches!(attribute, Attribute::LogoUrl),
            EntityKind::Airline => !matches!(attribute, Attribute::City | Attribute::ImageUrl),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    RegionOnly,
    VectorSimilarity,
}

impl RetrievalMode {
    /// Region-only retrieval needs a detected region and no keywords; any
    /// keyword forces vector similarity.
    pub fn select(region_detected: bool, keywords_present: bool) -> Self {
        if region_detected && !keywords_present {
            RetrievalMode::RegionOnly
        } else {
            RetrievalMode::VectorSimilarity
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalMode::RegionOnly => "region_only",
            RetrievalMode::VectorSimilarity => "vector_similarity",
        }
    }
}

/// Allow-listed distance functions. Smaller is more similar for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DistanceFn {
    Cosine,
    L2,
    L1,
}

impl DistanceFn {
    pub const ALL: [DistanceFn; 3] = [DistanceFn::Cosine, DistanceFn::L2, DistanceFn::L1];

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|d| d.sql_name() == name)
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            DistanceFn::Cosine => "vec_distance_cosine",
            DistanceFn::L2 => "vec_distance_l2",
            DistanceFn::L1 => "vec_distance_l1",
        }
    }
}

/// Columns a filter can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Country,
    City,
    Style,
    ImageUrl,
    LogoUrl,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Case-insensitive equality.
    ExactMatch { attribute: Attribute, value: String },
    /// Non-null and non-empty.
    Exists { attribute: Attribute },
    /// At least one keyword is a case-insensitive substring of the style or
    /// tags metadata.
    Keyword { keywords: Vec<String> },
    /// Country contains at least one of the tokens, case-insensitively.
    Region { countries: Vec<String> },
}

/// Query vector bound to a distance function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceExpr {
    pub function: DistanceFn,
    pub vector: String,
    pub dim: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Rows with a non-empty media URL first.
    MediaPresent,
    NameAsc,
    DistanceAsc,
    IdAsc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    target: EntityKind,
    mode: RetrievalMode,
    distance: Option<DistanceExpr>,
    filters: Vec<FilterSpec>,
    order: Vec<SortKey>,
    limit: usize,
    requested_k: usize,
}

impl QueryPlan {
    pub fn target(&self) -> EntityKind {
        self.target
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    pub fn distance(&self) -> Option<&DistanceExpr> {
        self.distance.as_ref()
    }

    pub fn filters(&self) -> &[FilterSpec] {
        &self.filters
    }

    pub fn order(&self) -> &[SortKey] {
        &self.order
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The caller's `k`. Recorded for diagnostics only; `limit` is what runs.
    pub fn requested_k(&self) -> usize {
        self.requested_k
    }
}

/// Recognized filters, parsed permissively from a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub country: Option<String>,
    pub city: Option<String>,
    pub style: Option<String>,
    pub has_image: bool,
    pub has_logo: bool,
}

impl SearchFilters {
    /// Accepts `null` or an object. Unknown keys and falsy values are
    /// dropped; only a non-object shape is an error.
    pub fn from_json(value: &Value) -> SearchResult<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(SearchError::validation(format!(
                    "filters must be a JSON object, got {}",
                    json_kind(other)
                )));
            }
        };
        for key in map.keys() {
            if !RECOGNIZED_FILTER_KEYS.contains(&key.as_str()) {
                debug!(key = %key, "ignoring unknown filter key");
            }
        }
        Ok(Self {
            country: map.get("country").and_then(text_value),
            city: map.get("city").and_then(text_value),
            style: map.get("style").and_then(text_value),
            has_image: map.get("has_image").is_some_and(is_truthy),
            has_logo: map.get("has_logo").is_some_and(is_truthy),
        })
    }

    pub fn parse(raw: &str) -> SearchResult<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| SearchError::validation(format!("filters are not valid JSON: {err}")))?;
        Self::from_json(&value)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64().is_some_and(|f| f != 0.0) => Some(n.to_string()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Serializes a vector as a JSON array. Non-finite components become 0.0.
pub fn serialize_vector(vec: &[f32]) -> String {
    let mut out = String::with_capacity(vec.len() * 8 + 2);
    out.push('[');
    for (i, v) in vec.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let v = if v.is_finite() { *v } else { 0.0 };
        out.push_str(&format!("{v:?}"));
    }
    out.push(']');
    out
}

#[derive(Debug, Clone, Copy)]
pub struct QueryPlanner {
    distance: DistanceFn,
    result_cap: usize,
}

impl QueryPlanner {
    pub fn new(distance: DistanceFn, result_cap: usize) -> Self {
        Self {
            distance,
            result_cap,
        }
    }

    pub fn plan(
        &self,
        target: EntityKind,
        analyzed: &AnalyzedQuery,
        filters: &SearchFilters,
        vector: Option<&[f32]>,
        requested_k: usize,
    ) -> SearchResult<QueryPlan> {
        let mode = RetrievalMode::select(analyzed.region.is_some(), !analyzed.keywords.is_empty());

        let distance = match mode {
            RetrievalMode::RegionOnly => None,
            RetrievalMode::VectorSimilarity => {
                let vector = vector.ok_or_else(|| {
                    SearchError::validation("vector similarity search requires a query vector")
                })?;
                Some(DistanceExpr {
                    function: self.distance,
                    vector: serialize_vector(vector),
                    dim: vector.len(),
                })
            }
        };

        let mut groups = attribute_filters(target, filters);
        if !analyzed.keywords.is_empty() {
            groups.push(FilterSpec::Keyword {
                keywords: analyzed.keywords.clone(),
            });
        }
        if let Some(countries) = &analyzed.region
            && !countries.is_empty()
        {
            groups.push(FilterSpec::Region {
                countries: countries.clone(),
            });
        }

        let order = match mode {
            RetrievalMode::RegionOnly => {
                vec![SortKey::MediaPresent, SortKey::NameAsc, SortKey::IdAsc]
            }
            RetrievalMode::VectorSimilarity => {
                vec![SortKey::MediaPresent, SortKey::DistanceAsc, SortKey::IdAsc]
            }
        };

        Ok(QueryPlan {
            target,
            mode,
            distance,
            filters: groups,
            order,
            limit: self.result_cap,
            requested_k,
        })
    }
}

fn attribute_filters(target: EntityKind, filters: &SearchFilters) -> Vec<FilterSpec> {
    let mut groups = Vec::new();
    let exact = [
        (Attribute::Country, &filters.country),
        (Attribute::City, &filters.city),
        (Attribute::Style, &filters.style),
    ];
    for (attribute, value) in exact {
        if let Some(value) = value
            && target.supports(attribute)
        {
            groups.push(FilterSpec::ExactMatch {
                attribute,
                value: value.clone(),
            });
        }
    }
    let exists = [
        (Attribute::ImageUrl, filters.has_image),
        (Attribute::LogoUrl, filters.has_logo),
    ];
    for (attribute, wanted) in exists {
        if wanted && target.supports(attribute) {
            groups.push(FilterSpec::Exists { attribute });
        }
    }
    groups
}
