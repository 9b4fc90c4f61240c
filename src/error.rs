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

//! Error taxonomy for the search path.
//!
//! Validation failures are the caller's fault and are never retried. Storage
//! failures are server-side and surface separately so the transport can map
//! them to a different status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("{what}: embedding dim {got} != configured embedding_dim {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("image/text embedding shape mismatch ({text} vs {image})")]
    ShapeMismatch { text: usize, image: usize },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl SearchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        !matches!(self, SearchError::Storage(_))
    }

    /// Short code used in JSON error envelopes.
    pub fn code(&self) -> &'static str {
        if self.is_validation() {
            "validation"
        } else {
            "storage"
        }
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(err: rusqlite::Error) -> Self {
        SearchError::Storage(err.into())
    }
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;
