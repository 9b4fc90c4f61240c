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

//! Lexical analysis of the raw query text: whitelisted descriptive keywords
//! and geographic region detection.

use std::collections::BTreeSet;

use serde::Serialize;

const BUILTIN_KEYWORDS: &[&str] = &[
    "indoor",
    "garden",
    "gardens",
    "greenery",
    "trees",
    "plants",
    "glass",
    "modern",
    "classic",
    "vault",
    "arched",
    "arches",
    "wood",
    "bamboo",
    "fabric",
    "curved",
    "color",
    "bright",
    "lotus",
    "heritage",
    "spacious",
    "art",
    "biophilic",
    "beautiful",
    "facade",
    "facades",
];

const BUILTIN_REGIONS: &[(&str, &[&str])] = &[
    (
        "asia",
        &[
            "india",
            "china",
            "japan",
            "singapore",
            "uae",
            "indonesia",
            "korea",
            "thailand",
            "qatar",
        ],
    ),
    (
        "europe",
        &[
            "france",
            "uk",
            "germany",
            "italy",
            "switzerland",
            "spain",
            "netherlands",
            "turkey",
        ],
    ),
    ("africa", &["south africa", "egypt", "ethiopia", "morocco"]),
    ("america", &["usa", "canada", "mexico", "brazil"]),
    ("oceania", &["australia", "new zealand"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordWhitelist {
    words: BTreeSet<String>,
}

impl KeywordWhitelist {
    pub fn new<'a>(words: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            words: words
                .into_iter()
                .map(|w| w.trim().to_ascii_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_KEYWORDS.iter().copied())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.words.contains(token)
    }

    /// Maximal runs of ASCII letters, lowercased, filtered by the whitelist.
    /// The result is sorted and free of duplicates.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut found = BTreeSet::new();
        for token in text
            .split(|c: char| !c.is_ascii_alphabetic())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_ascii_lowercase();
            if self.contains(&token) {
                found.insert(token);
            }
        }
        found.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMap {
    regions: Vec<(String, Vec<String>)>,
}

impl RegionMap {
    pub fn new(regions: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        Self {
            regions: regions
                .into_iter()
                .map(|(name, countries)| {
                    (
                        name.to_lowercase(),
                        countries.into_iter().map(|c| c.to_lowercase()).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_REGIONS.iter().map(|(name, countries)| {
            (
                name.to_string(),
                countries.iter().map(|c| c.to_string()).collect(),
            )
        }))
    }

    /// First region, in declaration order, whose name or any country token
    /// occurs as a substring of the lowercased text.
    pub fn detect_named(&self, text: &str) -> Option<(&str, &[String])> {
        let lowered = text.to_lowercase();
        self.regions
            .iter()
            .find(|(name, countries)| {
                lowered.contains(name.as_str())
                    || countries.iter().any(|c| lowered.contains(c.as_str()))
            })
            .map(|(name, countries)| (name.as_str(), countries.as_slice()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzedQuery {
    pub text: String,
    pub keywords: Vec<String>,
    pub region_name: Option<String>,
    pub region: Option<Vec<String>>,
}

impl AnalyzedQuery {
    /// A query with nothing to analyze, as used by pure image search.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            keywords: Vec::new(),
            region_name: None,
            region: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    keywords: KeywordWhitelist,
    regions: RegionMap,
}

impl QueryAnalyzer {
    pub fn new(keywords: KeywordWhitelist, regions: RegionMap) -> Self {
        Self { keywords, regions }
    }

    pub fn analyze(&self, text: &str) -> AnalyzedQuery {
        let text = text.trim().to_lowercase();
        let keywords = self.keywords.extract(&text);
        let (region_name, region) = match self.regions.detect_named(&text) {
            Some((name, countries)) => (Some(name.to_string()), Some(countries.to_vec())),
            None => (None, None),
        };
        AnalyzedQuery {
            text,
            keywords,
            region_name,
            region,
        }
    }
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new(KeywordWhitelist::builtin(), RegionMap::builtin())
    }
}
