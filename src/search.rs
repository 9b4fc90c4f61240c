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

//! Request-path orchestration: embed, analyze, plan, execute, rank.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use tracing::info;

use crate::analyze::AnalyzedQuery;
use crate::analyze::QueryAnalyzer;
use crate::combine::Weights;
use crate::combine::combine;
use crate::config::Config;
use crate::embed::EmbeddingProvider;
use crate::embed::validate_dim;
use crate::error::SearchError;
use crate::error::SearchResult;
use crate::model::RankedResult;
use crate::plan::EntityKind;
use crate::plan::QueryPlan;
use crate::plan::QueryPlanner;
use crate::plan::SearchFilters;
use crate::rank::assemble;
use crate::sql::render_plan;
use crate::store::Storage;

pub const MAX_K: usize = 10_000;
pub const IMAGE_DEFAULT_K: usize = 12;

/// Image input for hybrid search, either raw bytes or base64 text.
#[derive(Debug, Clone)]
pub enum ImageInput {
    Bytes(Vec<u8>),
    Base64(String),
}

impl ImageInput {
    fn decode(&self) -> SearchResult<Vec<u8>> {
        match self {
            ImageInput::Bytes(bytes) => Ok(bytes.clone()),
            ImageInput::Base64(text) => BASE64
                .decode(text.trim())
                .map_err(|err| {
                    SearchError::validation(format!("image is not valid base64: {err}"))
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HybridRequest {
    pub query: String,
    pub image: Option<ImageInput>,
    pub weight_text: f32,
    pub weight_image: f32,
    pub k: usize,
    pub filters: SearchFilters,
}

/// A ranked result plus the plan that produced it.
#[derive(Debug)]
pub struct SearchOutcome {
    pub plan: QueryPlan,
    pub analyzed: AnalyzedQuery,
    pub result: RankedResult,
}

/// The plan for a text query and how it renders, without executing it.
#[derive(Debug, Serialize)]
pub struct Explain {
    pub target: &'static str,
    pub mode: &'static str,
    pub keywords: Vec<String>,
    pub region: Option<String>,
    pub region_countries: Option<Vec<String>>,
    pub distance_fn: Option<&'static str>,
    pub dim: Option<usize>,
    pub filters: serde_json::Value,
    pub limit: usize,
    pub requested_k: usize,
    pub sql: String,
    pub param_count: usize,
}

pub struct SearchService<S> {
    analyzer: QueryAnalyzer,
    planner: QueryPlanner,
    embedder: Box<dyn EmbeddingProvider>,
    storage: S,
    dim: usize,
}

impl<S: Storage> SearchService<S> {
    pub fn new(
        config: &Config,
        embedder: Box<dyn EmbeddingProvider>,
        storage: S,
    ) -> anyhow::Result<Self> {
        if embedder.dim() != config.embedding_dim {
            anyhow::bail!(
                "embedding provider dim {} does not match configured embedding_dim {}",
                embedder.dim(),
                config.embedding_dim
            );
        }
        let analyzer = QueryAnalyzer::new(config.keyword_whitelist(), config.region_map());
        let planner = QueryPlanner::new(config.distance()?, config.result_cap);
        Ok(Self {
            analyzer,
            planner,
            embedder,
            storage,
            dim: config.embedding_dim,
        })
    }

    #[cfg(test)]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Text to airport search.
    pub fn search_text(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> SearchResult<SearchOutcome> {
        validate_request(query, k)?;
        let vector = self.embedder.embed_text(query)?;
        validate_dim(&vector, self.dim, "text")?;
        info!(query, dim = vector.len(), k, ?filters, "search text");
        self.run(EntityKind::Airport, self.analyzer.analyze(query), filters, Some(&vector), k)
    }

    /// Text plus optional image to airport search. Weights are normalized
    /// before the vectors are blended.
    pub fn search_hybrid(&self, request: &HybridRequest) -> SearchResult<SearchOutcome> {
        validate_request(&request.query, request.k)?;
        let text = self.embedder.embed_text(&request.query)?;
        validate_dim(&text, self.dim, "hybrid.text")?;

        let image = match &request.image {
            Some(input) => {
                let bytes = input.decode()?;
                let vector = self.embedder.embed_image(&bytes)?;
                validate_dim(&vector, self.dim, "hybrid.image")?;
                Some(vector)
            }
            None => None,
        };

        let weights = Weights::normalize(request.weight_text, request.weight_image);
        let vector = combine(
            text,
            image.as_deref(),
            request.weight_text,
            request.weight_image,
        )?;
        info!(
            query = %request.query,
            dim = vector.len(),
            k = request.k,
            filters = ?request.filters,
            wt = weights.text,
            wi = weights.image,
            "search hybrid"
        );
        self.run(
            EntityKind::Airport,
            self.analyzer.analyze(&request.query),
            &request.filters,
            Some(&vector),
            request.k,
        )
    }

    /// Image to airline logo search.
    pub fn search_image(
        &self,
        bytes: &[u8],
        k: usize,
        has_logo: bool,
    ) -> SearchResult<SearchOutcome> {
        validate_k(k)?;
        let vector = self.embedder.embed_image(bytes)?;
        validate_dim(&vector, self.dim, "image")?;
        info!(bytes = bytes.len(), dim = vector.len(), k, has_logo, "search image");
        let filters = SearchFilters {
            has_logo,
            ..SearchFilters::default()
        };
        self.run(EntityKind::Airline, AnalyzedQuery::empty(), &filters, Some(&vector), k)
    }

    /// Plans a text search and renders it without touching storage.
    pub fn explain(&self, query: &str, k: usize, filters: &SearchFilters) -> SearchResult<Explain> {
        validate_request(query, k)?;
        let vector = self.embedder.embed_text(query)?;
        validate_dim(&vector, self.dim, "text")?;
        let analyzed = self.analyzer.analyze(query);
        let plan = self
            .planner
            .plan(EntityKind::Airport, &analyzed, filters, Some(&vector), k)?;
        let (sql, params) = render_plan(&plan);
        Ok(Explain {
            target: plan.target().as_str(),
            mode: plan.mode().as_str(),
            keywords: analyzed.keywords.clone(),
            region: analyzed.region_name.clone(),
            region_countries: analyzed.region.clone(),
            distance_fn: plan.distance().map(|d| d.function.sql_name()),
            dim: plan.distance().map(|d| d.dim),
            filters: serde_json::to_value(plan.filters()).unwrap_or_default(),
            limit: plan.limit(),
            requested_k: plan.requested_k(),
            sql,
            param_count: params.len(),
        })
    }

    fn run(
        &self,
        target: EntityKind,
        analyzed: AnalyzedQuery,
        filters: &SearchFilters,
        vector: Option<&[f32]>,
        k: usize,
    ) -> SearchResult<SearchOutcome> {
        let plan = self.planner.plan(target, &analyzed, filters, vector, k)?;
        info!(
            target = plan.target().as_str(),
            mode = plan.mode().as_str(),
            keywords = ?analyzed.keywords,
            region = ?analyzed.region_name,
            "planned"
        );
        let rows = self.storage.execute(&plan)?;
        let result = assemble(&plan, rows);
        Ok(SearchOutcome {
            plan,
            analyzed,
            result,
        })
    }
}

fn validate_request(query: &str, k: usize) -> SearchResult<()> {
    if query.trim().is_empty() {
        return Err(SearchError::validation("query must not be empty"));
    }
    validate_k(k)
}

fn validate_k(k: usize) -> SearchResult<()> {
    if k == 0 || k > MAX_K {
        return Err(SearchError::validation(format!(
            "k must be between 1 and {MAX_K}, got {k}"
        )));
    }
    Ok(())
}
