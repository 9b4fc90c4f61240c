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

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use jsonschema::JSONSchema;
use predicates::prelude::*;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

const FIXTURE: &str = r#"{"type":"airport","id":1,"name":"Changi","city":"Singapore","country":"Singapore","iata":"SIN","image_url":"/img/changi.jpg","style":"Garden","tags":"indoor, greenery, trees"}
{"type":"airport","id":2,"name":"Indira Gandhi","city":"New Delhi","country":"India","iata":"DEL","style":"modern","tags":["glass"]}
{"type":"airport","id":3,"name":"Adolfo Suarez Barajas","city":"Madrid","country":"Spain","image_url":"https://img.example.com/barajas.jpg","style":"wood","tags":"bamboo, arched, curved"}
{"type":"airport","id":4,"name":"Kansai","city":"Osaka","country":"Japan","image_url":"","style":"glass"}
{"type":"airport","id":5,"name":"Chhatrapati Shivaji","city":"Mumbai","country":"India","image_url":"/img/bom.jpg","style":"heritage","tags":"art, lotus","license":"CC-BY"}
{"type":"airline","id":10,"name":"Singapore Airlines","iata":"SQ","icao":"SIA","country":"Singapore","logo_url":"/logos/sq.png"}
{"type":"airline","id":11,"name":"Air India","iata":"AI","icao":"AIC","country":"India"}
{"type":"airline","id":12,"name":"Iberia","iata":"IB","icao":"IBE","country":"Spain","logo_url":"/logos/ib.png"}
"#;

struct Fixture {
    _config_root: TempDir,
    root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let config_root = TempDir::new().expect("config tempdir");
        let root = TempDir::new().expect("tempdir");
        fs::write(
            root.path().join("skyvision.toml"),
            "embedding_dim = 8\npublic_base_url = \"https://cdn.example.com\"\n",
        )
        .expect("write config");
        fs::create_dir_all(root.path().join("data")).expect("data dir");
        fs::write(root.path().join("data/entities.jsonl"), FIXTURE).expect("write fixture");
        fs::write(root.path().join("logo.png"), b"\x89PNG fake logo bytes").expect("write logo");
        let fixture = Self {
            _config_root: config_root,
            root,
        };
        let output = fixture.cmd().arg("init").output().expect("init");
        assert!(
            output.status.success(),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        fixture
    }

    fn loaded() -> (Self, Value) {
        let fixture = Self::new();
        let load = run_json(fixture.cmd().args(["load", "data", "--json"]));
        (fixture, load)
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("skyvision"));
        let config_root = self._config_root.path();
        cmd.env("XDG_CONFIG_HOME", config_root);
        cmd.env("HOME", config_root);
        cmd.env("APPDATA", config_root);
        cmd.env_remove("SKYVISION_EMBEDDING_DIM");
        cmd.env_remove("SKYVISION_DISTANCE_FN");
        cmd.env_remove("SKYVISION_STORE");
        cmd.current_dir(self.path());
        cmd.args(["--config", "skyvision.toml"]);
        cmd
    }
}

fn load_schema() -> JSONSchema {
    let schema_text = include_str!("../schemas/response.schema.json");
    let schema_json: Value = serde_json::from_str(schema_text).expect("schema json");
    JSONSchema::options()
        .compile(&schema_json)
        .expect("compile schema")
}

fn assert_schema(value: &Value) {
    let schema = load_schema();
    if let Err(errors) = schema.validate(value) {
        let msgs: Vec<String> = errors.map(|e| e.to_string()).collect();
        panic!("schema validation failed:\n{}", msgs.join("\n"));
    }
}

fn run_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("run command");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: Value = serde_json::from_str(&stdout).expect("parse json");
    assert_schema(&value);
    value
}

fn run_json_failure(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("run command");
    assert!(!output.status.success(), "command unexpectedly succeeded");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: Value = serde_json::from_str(&stdout).expect("parse json");
    assert_schema(&value);
    assert_eq!(value["ok"], json!(false));
    value
}

fn hit_ids(value: &Value) -> Vec<i64> {
    value["results"]["hits"]
        .as_array()
        .expect("hits")
        .iter()
        .map(|hit| hit["id"].as_i64().expect("id"))
        .collect()
}

#[test]
fn load_reports_counts() {
    let (_fixture, load) = Fixture::loaded();
    assert_eq!(load["ok"], json!(true));
    assert_eq!(load["stats"]["airport_count"], json!(5));
    assert_eq!(load["stats"]["airline_count"], json!(3));
    assert_eq!(load["stats"]["total_hits"], json!(8));
    assert!(load.get("warnings").is_none());
}

#[test]
fn keyword_query_is_strict_and_media_first() {
    let (fixture, _) = Fixture::loaded();
    let value = run_json(fixture.cmd().args([
        "search",
        "airports with bamboo ceilings and glass facades",
        "--json",
    ]));
    assert_eq!(value["query"]["mode"], json!("vector_similarity"));
    assert_eq!(value["query"]["keywords"], json!(["bamboo", "facades", "glass"]));
    assert_eq!(value["query"]["region"], Value::Null);

    let ids = hit_ids(&value);
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], 3);
    let mut rest = ids[1..].to_vec();
    rest.sort();
    assert_eq!(rest, vec![2, 4]);

    let hits = value["results"]["hits"].as_array().expect("hits");
    assert_eq!(hits[0]["url"], json!("https://img.example.com/barajas.jpg"));
    assert_eq!(hits[0]["metadata"]["tags"], json!(["arched", "bamboo", "curved"]));
    let d1 = hits[1]["distance"].as_f64().expect("distance");
    let d2 = hits[2]["distance"].as_f64().expect("distance");
    assert!(d1 <= d2, "{d1} > {d2}");
}

#[test]
fn region_query_orders_by_media_then_name() {
    let (fixture, _) = Fixture::loaded();
    let value = run_json(fixture.cmd().args(["search", "airports in Asia", "--json"]));
    assert_eq!(value["query"]["mode"], json!("region_only"));
    assert_eq!(value["query"]["region"], json!("asia"));
    assert_eq!(hit_ids(&value), vec![1, 5, 2, 4]);
    let hits = value["results"]["hits"].as_array().expect("hits");
    assert!(hits.iter().all(|hit| hit["distance"] == json!(0.0)));
    assert_eq!(hits[0]["url"], json!("https://cdn.example.com/img/changi.jpg"));
    assert_eq!(hits[2]["url"], json!(""));
    assert_eq!(hits[2]["metadata"], json!({"style": "modern", "tags": ["glass"]}));
}

#[test]
fn attribute_filters_combine() {
    let (fixture, _) = Fixture::loaded();
    let value = run_json(fixture.cmd().args([
        "search",
        "terminal",
        "--filters",
        r#"{"has_image": true, "country": "India", "unknown": 1}"#,
        "--json",
    ]));
    assert_eq!(hit_ids(&value), vec![5]);
    let filters = value["query"]["filters"].as_array().expect("filters");
    assert_eq!(filters.len(), 2);
    assert_eq!(filters[0]["kind"], json!("exact_match"));
    assert_eq!(filters[1]["kind"], json!("exists"));
}

#[test]
fn large_k_is_capped() {
    let (fixture, _) = Fixture::loaded();
    let value = run_json(fixture.cmd().args(["search", "glass", "--k", "9999", "--json"]));
    assert_eq!(value["query"]["k"], json!(9999));
    assert_eq!(value["query"]["limit"], json!(1000));
    assert_eq!(value["results"]["count"], json!(2));
}

#[test]
fn invalid_requests_return_validation_errors() {
    let (fixture, _) = Fixture::loaded();
    let value = run_json_failure(fixture.cmd().args(["search", "glass", "--k", "10001", "--json"]));
    assert_eq!(value["error"]["code"], json!("validation"));

    let value = run_json_failure(fixture.cmd().args([
        "search",
        "glass",
        "--filters",
        "[1, 2]",
        "--json",
    ]));
    assert_eq!(value["error"]["code"], json!("validation"));
    let message = value["error"]["message"].as_str().expect("message");
    assert!(message.contains("JSON object"), "{message}");

    let value = run_json_failure(fixture.cmd().args(["image", "missing.png", "--json"]));
    assert_eq!(value["error"]["code"], json!("validation"));
}

#[test]
fn image_search_returns_airlines() {
    let (fixture, _) = Fixture::loaded();
    let value = run_json(fixture.cmd().args(["image", "logo.png", "--has-logo", "--json"]));
    assert_eq!(value["query"]["target"], json!("airline"));
    let mut ids = hit_ids(&value);
    ids.sort();
    assert_eq!(ids, vec![10, 12]);
    let hits = value["results"]["hits"].as_array().expect("hits");
    let sq = hits
        .iter()
        .find(|hit| hit["id"] == json!(10))
        .expect("singapore airlines");
    assert_eq!(sq["name"], json!("Singapore Airlines (SQ/SIA)"));
    assert_eq!(sq["url"], json!("https://cdn.example.com/logos/sq.png"));
    assert!(sq.get("city").is_none());

    let value = run_json(fixture.cmd().args(["image", "logo.png", "--json"]));
    assert_eq!(value["results"]["count"], json!(3));
}

#[test]
fn hybrid_search_accepts_image_file() {
    let (fixture, _) = Fixture::loaded();
    let value = run_json(fixture.cmd().args([
        "hybrid",
        "glass",
        "--image",
        "logo.png",
        "--weight-text",
        "0.6",
        "--weight-image",
        "0.4",
        "--json",
    ]));
    assert_eq!(value["query"]["target"], json!("airport"));
    let mut ids = hit_ids(&value);
    ids.sort();
    assert_eq!(ids, vec![2, 4]);

    let value = run_json_failure(fixture.cmd().args([
        "hybrid",
        "glass",
        "--image-base64",
        "%%%",
        "--json",
    ]));
    assert_eq!(value["error"]["code"], json!("validation"));
}

#[test]
fn explain_renders_sql_without_executing() {
    let fixture = Fixture::new();
    let value = run_json(fixture.cmd().args(["explain", "airports in asia", "--json"]));
    assert_eq!(value["explain"]["mode"], json!("region_only"));
    assert_eq!(value["explain"]["limit"], json!(1000));
    let sql = value["explain"]["sql"].as_str().expect("sql");
    assert!(sql.starts_with("SELECT id, name"), "{sql}");
    assert!(sql.ends_with("LIMIT ?"), "{sql}");

    fixture
        .cmd()
        .args(["explain", "bamboo", "--filters", r#"{"style":"wood"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mode: vector_similarity"))
        .stdout(predicate::str::contains("Distance: vec_distance_cosine (dim 8)"));
}

#[test]
fn stats_and_doctor() {
    let (fixture, _) = Fixture::loaded();
    let stats = run_json(fixture.cmd().args(["stats", "--json"]));
    assert_eq!(stats["stats"]["airport_count"], json!(5));
    assert_eq!(stats["stats"]["embedding_dim"], json!(8));

    let doctor = run_json(fixture.cmd().args(["doctor", "--json"]));
    assert_eq!(doctor["diagnostics"]["integrity"], json!("ok"));
    assert_eq!(doctor["diagnostics"]["ping"], json!(true));
}

#[test]
fn store_rejects_a_different_embedding_dim() {
    let (fixture, _) = Fixture::loaded();
    let value = run_json_failure(
        fixture
            .cmd()
            .env("SKYVISION_EMBEDDING_DIM", "16")
            .args(["stats", "--json"]),
    );
    assert_eq!(value["error"]["code"], json!("storage"));
    let message = value["error"]["message"].as_str().expect("message");
    assert!(message.contains("embedding_dim"), "{message}");
}

#[test]
fn load_rejects_bad_dimension_with_line_number() {
    let fixture = Fixture::new();
    fs::write(
        fixture.path().join("bad.jsonl"),
        "{\"type\":\"airport\",\"id\":1,\"name\":\"A\"}\n{\"type\":\"airport\",\"id\":2,\"name\":\"B\",\"embedding\":[1,2,3]}\n",
    )
    .expect("write bad fixture");
    fixture
        .cmd()
        .args(["load", "bad.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));

    let stats = run_json(fixture.cmd().args(["stats", "--json"]));
    assert_eq!(stats["stats"]["airport_count"], json!(0));
}

#[test]
fn missing_store_is_reported() {
    let config_root = TempDir::new().expect("config tempdir");
    let root = TempDir::new().expect("tempdir");
    Command::new(assert_cmd::cargo::cargo_bin!("skyvision"))
        .env("XDG_CONFIG_HOME", config_root.path())
        .env("HOME", config_root.path())
        .current_dir(root.path())
        .args(["--store", "nowhere.db", "stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("skyvision init"));
}
