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

mod analyze;
mod cli;
mod combine;
mod config;
mod embed;
mod error;
mod ingest;
mod model;
mod output;
mod plan;
mod rank;
mod search;
mod sql;
mod store;

use std::path::Path;
use std::sync::Once;
use std::time::Instant;

use anyhow::Context as _;
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::ExplainArgs;
use crate::cli::HybridArgs;
use crate::cli::ImageArgs;
use crate::cli::LoadArgs;
use crate::cli::SearchArgs;
use crate::config::ConfigCtx;
use crate::error::SearchError;
use crate::model::Hit;
use crate::output::JsonResponse;
use crate::output::QueryOut;
use crate::output::StatsOut;
use crate::output::print_json;
use crate::plan::SearchFilters;
use crate::search::HybridRequest;
use crate::search::ImageInput;
use crate::search::SearchOutcome;
use crate::search::SearchService;
use crate::store::Store;
use crate::store::StoreMode;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("SKYVISION_LOG")
            .unwrap_or_else(|_| EnvFilter::new("skyvision=warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    });
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let ctx = ConfigCtx::load(cli.config.as_deref(), cli.store)?;
    match cli.command {
        Commands::Init => cmd_init(&ctx),
        Commands::Load(args) => {
            let json = args.json;
            handle_result(cmd_load(&ctx, args), json)
        }
        Commands::Search(args) => {
            let json = args.json;
            handle_result(cmd_search(&ctx, args), json)
        }
        Commands::Hybrid(args) => {
            let json = args.json;
            handle_result(cmd_hybrid(&ctx, args), json)
        }
        Commands::Image(args) => {
            let json = args.json;
            handle_result(cmd_image(&ctx, args), json)
        }
        Commands::Explain(args) => {
            let json = args.json;
            handle_result(cmd_explain(&ctx, args), json)
        }
        Commands::Stats { json } => handle_result(cmd_stats(&ctx, json), json),
        Commands::Doctor { json } => handle_result(cmd_doctor(&ctx, json), json),
    }
}

/// Short error code for JSON envelopes. Request problems are `validation`;
/// everything else failed on our side and is `storage`.
fn error_code(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SearchError>())
        .map(SearchError::code)
        .unwrap_or("storage")
}

fn handle_result(result: Result<()>, json: bool) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if json {
                let resp = JsonResponse::error(error_code(&err), &format!("{err:#}"));
                print_json(&resp)?;
                std::process::exit(1);
            } else {
                Err(err)
            }
        }
    }
}

fn open_service(ctx: &ConfigCtx) -> Result<SearchService<Store>> {
    let store = Store::open(&ctx.store_path(), StoreMode::ReadOnly, ctx.config.embedding_dim)?;
    let embedder = embed::build_embedder(&ctx.config)?;
    SearchService::new(&ctx.config, embedder, store)
}

fn parse_filters(raw: Option<&str>) -> Result<SearchFilters> {
    match raw {
        Some(raw) => Ok(SearchFilters::parse(raw)?),
        None => Ok(SearchFilters::default()),
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|err| {
        SearchError::validation(format!("read image {}: {err}", path.display())).into()
    })
}

fn cmd_init(ctx: &ConfigCtx) -> Result<()> {
    let store_path = ctx.store_path();
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create dir {parent:?}"))?;
    }
    Store::init(&store_path, ctx.config.embedding_dim)?;
    println!(
        "Initialized SkyVision store at {} (embedding_dim {})",
        store_path.display(),
        ctx.config.embedding_dim
    );
    Ok(())
}

fn cmd_load(ctx: &ConfigCtx, args: LoadArgs) -> Result<()> {
    let store = Store::open(&ctx.store_path(), StoreMode::ReadWrite, ctx.config.embedding_dim)?;
    let embedder = embed::build_embedder(&ctx.config)?;
    let opts = ingest::IngestOptions {
        glob: args.glob,
        ignore: args.ignore,
    };
    let report = ingest::ingest_paths(&store, &ctx.config, embedder.as_ref(), args.paths, opts)?;

    if args.json {
        let resp = JsonResponse::ok()
            .with_stats(report.stats())
            .with_warnings(report.warnings);
        print_json(&resp)?;
    } else {
        println!(
            "Loaded {} airports and {} airlines from {} files ({} embedded)",
            report.airports, report.airlines, report.files, report.embedded
        );
        for warn in report.warnings {
            eprintln!("warning: {warn}");
        }
    }
    Ok(())
}

fn cmd_search(ctx: &ConfigCtx, args: SearchArgs) -> Result<()> {
    let started = Instant::now();
    let service = open_service(ctx)?;
    let filters = parse_filters(args.filters.as_deref())?;
    let k = args.k.unwrap_or(ctx.config.default_k);
    let outcome = service.search_text(&args.query, k, &filters)?;
    emit_outcome(&args.query, outcome, started, args.json)
}

fn cmd_hybrid(ctx: &ConfigCtx, args: HybridArgs) -> Result<()> {
    let started = Instant::now();
    let service = open_service(ctx)?;
    let image = match (args.image, args.image_base64) {
        (Some(path), _) => Some(ImageInput::Bytes(read_image(&path)?)),
        (None, Some(text)) => Some(ImageInput::Base64(text)),
        (None, None) => None,
    };
    let request = HybridRequest {
        query: args.query,
        image,
        weight_text: args.weight_text.unwrap_or(ctx.config.weight_text),
        weight_image: args.weight_image.unwrap_or(ctx.config.weight_image),
        k: args.k.unwrap_or(ctx.config.default_k),
        filters: parse_filters(args.filters.as_deref())?,
    };
    let outcome = service.search_hybrid(&request)?;
    emit_outcome(&request.query, outcome, started, args.json)
}

fn cmd_image(ctx: &ConfigCtx, args: ImageArgs) -> Result<()> {
    let started = Instant::now();
    let service = open_service(ctx)?;
    let bytes = read_image(&args.path)?;
    let outcome = service.search_image(&bytes, args.k, args.has_logo)?;
    let label = args.path.display().to_string();
    emit_outcome(&label, outcome, started, args.json)
}

fn emit_outcome(text: &str, outcome: SearchOutcome, started: Instant, json: bool) -> Result<()> {
    if json {
        let stats = StatsOut {
            took_ms: started.elapsed().as_millis() as i64,
            total_hits: outcome.result.count as i64,
            ..StatsOut::default()
        };
        let resp = JsonResponse::ok()
            .with_query(QueryOut::from_plan(text, &outcome.analyzed, &outcome.plan))
            .with_results(serde_json::to_value(&outcome.result)?)
            .with_stats(stats);
        print_json(&resp)?;
    } else {
        print_table(&outcome.result.hits);
    }
    Ok(())
}

fn print_table(hits: &[Hit]) {
    if hits.is_empty() {
        println!("No results");
        return;
    }
    for (idx, hit) in hits.iter().enumerate() {
        let place = match (hit.city.as_deref(), hit.country.as_deref()) {
            (Some(city), Some(country)) => format!("{city}, {country}"),
            (None, Some(country)) => country.to_string(),
            (Some(city), None) => city.to_string(),
            (None, None) => String::new(),
        };
        println!(
            "{:>4}  {:.4}  {}  {}  {}",
            idx + 1,
            hit.distance,
            hit.name,
            place,
            hit.url
        );
    }
}

fn cmd_explain(ctx: &ConfigCtx, args: ExplainArgs) -> Result<()> {
    let embedder = embed::build_embedder(&ctx.config)?;
    let service = SearchService::new(&ctx.config, embedder, NoStorage)?;
    let filters = parse_filters(args.filters.as_deref())?;
    let k = args.k.unwrap_or(ctx.config.default_k);
    let explain = service.explain(&args.query, k, &filters)?;

    if args.json {
        let resp = JsonResponse::ok().with_explain(serde_json::to_value(&explain)?);
        print_json(&resp)?;
    } else {
        println!("Target: {}", explain.target);
        println!("Mode: {}", explain.mode);
        println!("Keywords: {}", explain.keywords.join(", "));
        match (&explain.region, &explain.region_countries) {
            (Some(name), Some(countries)) => println!("Region: {name} [{}]", countries.join(", ")),
            _ => println!("Region: -"),
        }
        if let Some(function) = explain.distance_fn {
            println!("Distance: {function} (dim {})", explain.dim.unwrap_or(0));
        }
        println!("Limit: {} (requested k {})", explain.limit, explain.requested_k);
        println!("SQL: {}", explain.sql);
        println!("Params: {}", explain.param_count);
    }
    Ok(())
}

/// Storage for commands that plan but never execute.
struct NoStorage;

impl store::Storage for NoStorage {
    fn execute(&self, _plan: &plan::QueryPlan) -> error::SearchResult<Vec<model::CandidateRow>> {
        Err(SearchError::Storage(anyhow::anyhow!(
            "explain does not execute plans"
        )))
    }
}

fn cmd_stats(ctx: &ConfigCtx, json: bool) -> Result<()> {
    let store = Store::open(&ctx.store_path(), StoreMode::ReadOnly, ctx.config.embedding_dim)?;
    let stats = store.stats()?;

    if json {
        let resp = JsonResponse::ok().with_stats(StatsOut {
            took_ms: 0,
            total_hits: 0,
            airport_count: Some(stats.airport_count),
            airline_count: Some(stats.airline_count),
            embedding_dim: Some(stats.embedding_dim),
            db_size_bytes: Some(stats.db_size_bytes),
        });
        print_json(&resp)?;
    } else {
        println!("Airports: {}", stats.airport_count);
        println!("Airlines: {}", stats.airline_count);
        println!("Embedding dim: {}", stats.embedding_dim);
        println!("Distance: {}", ctx.config.distance_fn);
        println!("DB size: {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

fn cmd_doctor(ctx: &ConfigCtx, json: bool) -> Result<()> {
    let store = Store::open(&ctx.store_path(), StoreMode::ReadOnly, ctx.config.embedding_dim)?;
    let report = store.integrity_check()?;

    if json {
        let resp = JsonResponse::ok()
            .with_stats(StatsOut {
                took_ms: 0,
                total_hits: 0,
                airport_count: Some(report.stats.airport_count),
                airline_count: Some(report.stats.airline_count),
                embedding_dim: Some(report.stats.embedding_dim),
                db_size_bytes: Some(report.stats.db_size_bytes),
            })
            .with_diagnostics(serde_json::json!({
                "integrity": report.status,
                "ping": report.ping,
                "vec_version": report.vec_version,
            }));
        print_json(&resp)?;
    } else {
        println!("Integrity: {}", report.status);
        println!("Ping: {}", if report.ping { "ok" } else { "failed" });
        println!(
            "sqlite-vec: {}",
            report.vec_version.as_deref().unwrap_or("unavailable")
        );
    }
    Ok(())
}
