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

use anyhow::Result;
use sha2::Digest;
use sha2::Sha256;

use crate::config::Config;
use crate::error::SearchError;
use crate::error::SearchResult;

pub const EMBEDDING_HASH: &str = "hash";

/// Source of query and entity embeddings. Implementations are built once at
/// startup and shared read-only across requests.
pub trait EmbeddingProvider: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_text(&self, text: &str) -> SearchResult<Vec<f32>>;
    fn embed_image(&self, bytes: &[u8]) -> SearchResult<Vec<f32>>;
}

pub fn build_embedder(config: &Config) -> Result<Box<dyn EmbeddingProvider>> {
    let name = config.embedding.trim().to_lowercase();
    match name.as_str() {
        EMBEDDING_HASH => Ok(Box::new(HashEmbedder::new(config.embedding_dim))),
        _ => anyhow::bail!(
            "unsupported embedding '{}'; supported: {}",
            config.embedding,
            EMBEDDING_HASH
        ),
    }
}

/// Rejects vectors whose length differs from the configured dimension.
pub fn validate_dim(vec: &[f32], expected: usize, what: &'static str) -> SearchResult<()> {
    if vec.len() != expected {
        return Err(SearchError::DimensionMismatch {
            what,
            expected,
            got: vec.len(),
        });
    }
    Ok(())
}

/// Deterministic feature-hashing embedder. Text is hashed per whitespace
/// token; images per 64-byte window. Output is L2-normalized.
#[derive(Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_text(&self, text: &str) -> SearchResult<Vec<f32>> {
        let mut vec = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let (idx, sign) = hash_feature(token.to_lowercase().as_bytes(), self.dim);
            vec[idx] += sign;
        }
        Ok(l2_normalize(vec))
    }

    fn embed_image(&self, bytes: &[u8]) -> SearchResult<Vec<f32>> {
        if bytes.is_empty() {
            return Err(SearchError::validation("image is empty"));
        }
        let mut vec = vec![0.0f32; self.dim];
        for window in bytes.chunks(64) {
            let (idx, sign) = hash_feature(window, self.dim);
            vec[idx] += sign;
        }
        Ok(l2_normalize(vec))
    }
}

fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let mut norm = 0.0f32;
    for v in &vec {
        norm += v * v;
    }
    if norm > 0.0 {
        let inv = 1.0 / norm.sqrt();
        for v in &mut vec {
            *v *= inv;
        }
    }
    vec
}

fn hash_feature(input: &[u8], dim: usize) -> (usize, f32) {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    let val = u64::from_le_bytes(bytes);
    let idx = (val as usize) % dim;
    let sign = if (val & (1 << 63)) != 0 { 1.0 } else { -1.0 };
    (idx, sign)
}

pub fn to_bytes(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
