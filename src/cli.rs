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

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

#[derive(Parser, Debug)]
#[command(
    name = "skyvision",
    version,
    about = "Multimodal retrieval over airports and airlines"
)]
pub struct Cli {
    /// Path to the store file (overrides config)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Path to a config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new store
    Init,

    /// Load airports and airlines from JSONL files
    Load(LoadArgs),

    /// Text search over airports
    Search(SearchArgs),

    /// Text plus image search over airports
    Hybrid(HybridArgs),

    /// Image search over airline logos
    Image(ImageArgs),

    /// Show the plan for a text query without running it
    Explain(ExplainArgs),

    /// Show stats
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Run integrity checks
    Doctor {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// JSONL files or directories
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Glob for files inside directories
    #[arg(long)]
    pub glob: Option<String>,

    /// Ignore globs
    #[arg(long)]
    pub ignore: Vec<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text
    pub query: String,

    /// Requested result count (1..=10000)
    #[arg(long)]
    pub k: Option<usize>,

    /// Filters as a JSON object
    #[arg(long)]
    pub filters: Option<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HybridArgs {
    /// Query text
    pub query: String,

    /// Image file to blend with the text
    #[arg(long, conflicts_with = "image_base64")]
    pub image: Option<PathBuf>,

    /// Base64-encoded image to blend with the text
    #[arg(long)]
    pub image_base64: Option<String>,

    /// Weight of the text embedding
    #[arg(long)]
    pub weight_text: Option<f32>,

    /// Weight of the image embedding
    #[arg(long)]
    pub weight_image: Option<f32>,

    /// Requested result count (1..=10000)
    #[arg(long)]
    pub k: Option<usize>,

    /// Filters as a JSON object
    #[arg(long)]
    pub filters: Option<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Image file
    pub path: PathBuf,

    /// Requested result count (1..=10000)
    #[arg(long, default_value_t = crate::search::IMAGE_DEFAULT_K)]
    pub k: usize,

    /// Only airlines with a logo
    #[arg(long)]
    pub has_logo: bool,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExplainArgs {
    /// Query text
    pub query: String,

    /// Requested result count (1..=10000)
    #[arg(long)]
    pub k: Option<usize>,

    /// Filters as a JSON object
    #[arg(long)]
    pub filters: Option<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}
