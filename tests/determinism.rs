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

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

const COUNTRIES: [&str; 6] = ["India", "Japan", "Spain", "Brazil", "Egypt", "Australia"];
const STYLES: [&str; 4] = ["glass", "wood", "modern", "garden"];

fn skyvision_cmd(config_root: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("skyvision"));
    cmd.env("XDG_CONFIG_HOME", config_root);
    cmd.env("HOME", config_root);
    cmd.env("APPDATA", config_root);
    cmd.env_remove("SKYVISION_EMBEDDING_DIM");
    cmd.env_remove("SKYVISION_DISTANCE_FN");
    cmd.env_remove("SKYVISION_STORE");
    cmd.args(["--config", "skyvision.toml"]);
    cmd
}

fn normalize_json(mut value: Value) -> Value {
    if let Some(stats) = value.get_mut("stats")
        && let Some(obj) = stats.as_object_mut()
    {
        obj.insert("took_ms".to_string(), json!(0));
    }
    value
}

fn run_json(cmd: &mut Command, cwd: &Path) -> Value {
    let output = cmd.current_dir(cwd).output().expect("run command");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).expect("parse json")
}

fn assert_repeatable(config_root: &Path, args: &[&str], runs: usize, cwd: &Path) -> Value {
    let mut baseline: Option<Value> = None;
    for _ in 0..runs {
        let mut cmd = skyvision_cmd(config_root);
        cmd.args(args);
        let json = normalize_json(run_json(&mut cmd, cwd));
        if let Some(ref expected) = baseline {
            assert_eq!(&json, expected);
        } else {
            baseline = Some(json);
        }
    }
    baseline.expect("at least one run")
}

/// Airports with repeated embeddings and names so ordering has to break ties.
fn corpus() -> String {
    let mut out = String::new();
    for id in 1..=48i64 {
        let country = COUNTRIES[(id as usize) % COUNTRIES.len()];
        let style = STYLES[(id as usize) % STYLES.len()];
        let image = if id % 3 == 0 {
            format!("\"/img/{id}.jpg\"")
        } else {
            "null".to_string()
        };
        let bucket = (id % 4) as usize;
        let mut embedding = vec!["0.1"; 8];
        embedding[bucket] = "1.0";
        writeln!(
            out,
            r#"{{"type":"airport","id":{id},"name":"Airport {:02}","country":"{country}","image_url":{image},"style":"{style}","embedding":[{}]}}"#,
            id % 12,
            embedding.join(",")
        )
        .expect("write line");
    }
    out
}

fn has_media(hit: &Value) -> bool {
    hit["url"].as_str().is_some_and(|url| !url.is_empty())
}

#[test]
fn deterministic_outputs() {
    let config_temp = TempDir::new().expect("config tempdir");
    let config_root = config_temp.path();
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    fs::write(root.join("skyvision.toml"), "embedding_dim = 8\n").expect("write config");
    fs::write(root.join("airports.jsonl"), corpus()).expect("write corpus");

    let mut cmd = skyvision_cmd(config_root);
    cmd.arg("init");
    assert!(cmd.current_dir(root).output().expect("init").status.success());

    let mut cmd = skyvision_cmd(config_root);
    cmd.args(["load", "airports.jsonl", "--json"]);
    assert!(cmd.current_dir(root).output().expect("load").status.success());

    let vector = assert_repeatable(config_root, &["search", "glass", "--json"], 10, root);
    let hits = vector["results"]["hits"].as_array().expect("hits");
    assert_eq!(hits.len(), 12);
    for pair in hits.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(has_media(a) || !has_media(b), "media rows must come first");
        if has_media(a) == has_media(b) {
            let da = a["distance"].as_f64().expect("distance");
            let db = b["distance"].as_f64().expect("distance");
            assert!(da <= db, "{da} > {db}");
        }
    }

    let region = assert_repeatable(
        config_root,
        &["search", "airports in africa", "--json"],
        10,
        root,
    );
    let hits = region["results"]["hits"].as_array().expect("hits");
    assert_eq!(hits.len(), 8);
    for pair in hits.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(has_media(a) || !has_media(b), "media rows must come first");
        if has_media(a) == has_media(b) {
            let na = a["name"].as_str().expect("name");
            let nb = b["name"].as_str().expect("name");
            assert!(na <= nb, "{na} > {nb}");
        }
    }

    assert_repeatable(
        config_root,
        &[
            "hybrid",
            "modern terminals",
            "--image-base64",
            "aGVsbG8gd29ybGQ=",
            "--weight-text",
            "0.7",
            "--weight-image",
            "0.3",
            "--json",
        ],
        10,
        root,
    );
}
