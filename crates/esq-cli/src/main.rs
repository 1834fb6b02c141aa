//! # esq-cli — command line front end of ESQ
//!
//! - `esq compile <groups.json>` / `esq aggs <aggs.json>` — compile locally, no hub needed.
//! - `esq search`, `esq page` — run searches through the hub.
//! - `esq stats`, `esq similar`, `esq slow` — performance and slow-query reports.
//! - `esq connections list|add|remove` — manage hub connections.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tabled::{Table, Tabled};

use esq_core::{compile_aggregations, compile_query, compile_sort, AggregationSpec, Group, SortSpec};

/// ESQ — compile, run and profile search queries.
#[derive(Parser)]
#[command(name = "esq", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a filter tree (JSON array of groups, or `{groups, sort}`) to query DSL.
    Compile { file: PathBuf },

    /// Compile an aggregation tree (JSON array of specs) to an `aggs` body.
    Aggs { file: PathBuf },

    /// Run a search.
    Search {
        /// Connection id.
        connection: String,
        index: String,
        /// Query DSL as a JSON string (default: match_all).
        #[arg(long)]
        query: Option<String>,
        /// Filter tree file instead of raw DSL.
        #[arg(long, conflicts_with = "query")]
        builder: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        from: usize,
        #[arg(long, default_value_t = 10)]
        size: usize,
        /// Bypass the hub's result cache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Jump to a page of the most recent search (1-based).
    Page {
        connection: String,
        page: usize,
        #[arg(long)]
        size: Option<usize>,
    },

    /// Performance statistics over recent queries.
    Stats,

    /// Slow queries similar to the given query DSL.
    Similar { query: String },

    /// Slow-query log.
    Slow {
        #[command(subcommand)]
        action: SlowCmd,
    },

    /// Manage connections (list, add, remove).
    Connections {
        #[command(subcommand)]
        action: ConnectionCmd,
    },
}

#[derive(Subcommand)]
enum SlowCmd {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Stats,
    Clusters,
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Show the slow-query threshold, or change it with --set
    Threshold {
        #[arg(long)]
        set: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConnectionCmd {
    List,
    Add {
        id: String,
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Accept invalid TLS certificates.
        #[arg(long)]
        insecure: bool,
    },
    Remove {
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Compile { file } => compile_file(&file),
        Commands::Aggs { file } => aggs_file(&file),

        // Hub commands
        cmd => {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to build tokio runtime: {}", e);
                    process::exit(1);
                }
            };
            rt.block_on(async_main(cmd))
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

// =============================================================================
// Local compilation
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum FilterFile {
    Groups(Vec<Group>),
    Full {
        #[serde(default)]
        groups: Vec<Group>,
        #[serde(default)]
        sort: Vec<SortSpec>,
    },
}

impl FilterFile {
    fn into_parts(self) -> (Vec<Group>, Vec<SortSpec>) {
        match self {
            Self::Groups(groups) => (groups, Vec::new()),
            Self::Full { groups, sort } => (groups, sort),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("invalid JSON in {}: {}", path.display(), e))
}

fn compile_filter(file: FilterFile) -> Value {
    let (groups, sort) = file.into_parts();
    let mut body = json!({ "query": compile_query(&groups) });
    if let Some(sort) = compile_sort(&sort) {
        body["sort"] = Value::Array(sort);
    }
    body
}

fn compile_file(path: &Path) -> Result<(), String> {
    let file: FilterFile = read_json(path)?;
    print_json(&compile_filter(file));
    Ok(())
}

fn aggs_file(path: &Path) -> Result<(), String> {
    let specs: Vec<AggregationSpec> = read_json(path)?;
    let aggs = compile_aggregations(&specs).map_err(|e| e.to_string())?;
    print_json(&json!({ "aggs": aggs }));
    Ok(())
}

// =============================================================================
// Hub commands
// =============================================================================

async fn async_main(cmd: Commands) -> Result<(), String> {
    let client = reqwest::Client::new();
    let base_url =
        std::env::var("ESQ_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let hub = Hub {
        client: &client,
        base_url: &base_url,
    };

    match cmd {
        Commands::Search {
            connection,
            index,
            query,
            builder,
            from,
            size,
            no_cache,
        } => {
            let result = match builder {
                Some(path) => {
                    let (groups, sort) = read_json::<FilterFile>(&path)?.into_parts();
                    let payload = json!({
                        "connection_id": connection,
                        "index": index,
                        "groups": groups,
                        "sort": sort,
                        "from": from,
                        "size": size,
                        "use_cache": !no_cache,
                    });
                    hub.post("/api/search/builder", &payload).await?
                }
                None => {
                    let dsl = match query {
                        Some(text) => serde_json::from_str::<Value>(&text)
                            .map_err(|e| format!("invalid query JSON: {}", e))?,
                        None => esq_core::match_all(),
                    };
                    let payload = json!({
                        "connection_id": connection,
                        "query": {"index": index, "query": dsl, "from": from, "size": size},
                        "use_cache": !no_cache,
                    });
                    hub.post("/api/search", &payload).await?
                }
            };
            print_hits(&result);
        }

        Commands::Page {
            connection,
            page,
            size,
        } => {
            let payload = json!({ "connection_id": connection, "page": page, "page_size": size });
            let result = hub.post("/api/search/page", &payload).await?;
            print_hits(&result);
        }

        Commands::Stats => {
            let stats = hub.get("/api/performance/stats").await?;
            print_json(&stats);
        }

        Commands::Similar { query } => {
            let dsl: Value =
                serde_json::from_str(&query).map_err(|e| format!("invalid query JSON: {}", e))?;
            let similar = hub
                .post("/api/performance/similar", &json!({ "query": dsl }))
                .await?;
            println!("{}", Table::new(similar_rows(&similar)));
        }

        Commands::Slow { action } => match action {
            SlowCmd::List { limit } => {
                let entries = hub.get(&format!("/api/slow-queries?limit={}", limit)).await?;
                println!("{}", Table::new(slow_rows(&entries)));
            }
            SlowCmd::Stats => print_json(&hub.get("/api/slow-queries/stats").await?),
            SlowCmd::Clusters => print_json(&hub.get("/api/slow-queries/clusters").await?),
            SlowCmd::Export { format } => {
                let body = hub
                    .get_text(&format!("/api/slow-queries/export?format={}", format))
                    .await?;
                println!("{}", body);
            }
            SlowCmd::Threshold { set } => {
                let current = match set {
                    Some(ms) => {
                        hub.put("/api/slow-queries/threshold", &json!({ "threshold_ms": ms }))
                            .await?
                    }
                    None => hub.get("/api/slow-queries/threshold").await?,
                };
                println!("Slow query threshold: {}ms", current["threshold_ms"]);
            }
        },

        Commands::Connections { action } => match action {
            ConnectionCmd::List => {
                let connections = hub.get("/api/connections").await?;
                print_json(&connections);
            }
            ConnectionCmd::Add {
                id,
                url,
                name,
                username,
                password,
                insecure,
            } => {
                let name = name.unwrap_or_else(|| id.clone());
                let payload = json!({
                    "id": &id,
                    "name": name,
                    "url": url,
                    "username": username,
                    "password": password,
                    "accept_invalid_certs": insecure,
                });
                let info = hub.post("/api/connections", &payload).await?;
                println!("Connection added: {}", info["id"].as_str().unwrap_or(&id));
            }
            ConnectionCmd::Remove { id } => {
                hub.delete(&format!("/api/connections/{}", id)).await?;
                println!("Connection removed: {}", id);
            }
        },

        Commands::Compile { .. } | Commands::Aggs { .. } => {}
    }
    Ok(())
}

struct Hub<'a> {
    client: &'a reqwest::Client,
    base_url: &'a str,
}

impl Hub<'_> {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str) -> Result<Value, String> {
        let text = self.get_text(path).await?;
        serde_json::from_str(&text).map_err(|e| format!("invalid response: {}", e))
    }

    async fn get_text(&self, path: &str) -> Result<String, String> {
        check(self.client.get(self.url(path)).send().await).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, String> {
        let text = check(self.client.post(self.url(path)).json(body).send().await).await?;
        serde_json::from_str(&text).map_err(|e| format!("invalid response: {}", e))
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, String> {
        let text = check(self.client.put(self.url(path)).json(body).send().await).await?;
        serde_json::from_str(&text).map_err(|e| format!("invalid response: {}", e))
    }

    async fn delete(&self, path: &str) -> Result<(), String> {
        check(self.client.delete(self.url(path)).send().await).await?;
        Ok(())
    }
}

/// Body of a successful response; the hub's error text otherwise.
async fn check(response: Result<reqwest::Response, reqwest::Error>) -> Result<String, String> {
    let response = response.map_err(|e| e.to_string())?;
    let status = response.status();
    let text = response.text().await.map_err(|e| e.to_string())?;
    if status.is_success() {
        Ok(text)
    } else {
        Err(format!("{}: {}", status, text))
    }
}

// =============================================================================
// Output
// =============================================================================

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

#[derive(Tabled)]
struct HitRow {
    id: String,
    index: String,
    score: String,
    source: String,
}

fn hit_rows(result: &Value) -> Vec<HitRow> {
    let hits = result["hits"].as_array().cloned().unwrap_or_default();
    hits.iter()
        .map(|hit| {
            let mut source = hit["_source"].to_string();
            if source.chars().count() > 80 {
                source = source.chars().take(77).collect::<String>() + "...";
            }
            HitRow {
                id: hit["_id"].as_str().unwrap_or_default().to_string(),
                index: hit["_index"].as_str().unwrap_or_default().to_string(),
                score: hit["_score"]
                    .as_f64()
                    .map(|s| format!("{:.3}", s))
                    .unwrap_or_default(),
                source,
            }
        })
        .collect()
}

fn print_hits(result: &Value) {
    println!("{}", Table::new(hit_rows(result)));
    println!(
        "total: {}  took: {}ms  timed_out: {}",
        result["total"], result["took"], result["timed_out"]
    );
}

#[derive(Tabled)]
struct SlowRow {
    query_id: String,
    index: String,
    execution_ms: u64,
    results: u64,
    timestamp: String,
}

fn slow_row(entry: &Value) -> SlowRow {
    SlowRow {
        query_id: entry["query_id"].as_str().unwrap_or_default().to_string(),
        index: entry["index"].as_str().unwrap_or_default().to_string(),
        execution_ms: entry["execution_time_ms"].as_u64().unwrap_or(0),
        results: entry["result_count"].as_u64().unwrap_or(0),
        timestamp: entry["timestamp"].as_str().unwrap_or_default().to_string(),
    }
}

fn slow_rows(entries: &Value) -> Vec<SlowRow> {
    entries
        .as_array()
        .map(|items| items.iter().map(slow_row).collect())
        .unwrap_or_default()
}

#[derive(Tabled)]
struct SimilarRow {
    similarity: String,
    #[tabled(inline)]
    entry: SlowRow,
}

fn similar_rows(similar: &Value) -> Vec<SimilarRow> {
    similar
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| SimilarRow {
                    similarity: format!("{:.2}", item["similarity"].as_f64().unwrap_or(0.0)),
                    entry: slow_row(&item["entry"]),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_file_accepts_bare_array_and_object() {
        let bare: FilterFile = serde_json::from_value(json!([
            {"operator": "must", "conditions": [{"field": "a", "operator": "exists"}]}
        ]))
        .unwrap();
        let body = compile_filter(bare);
        assert_eq!(body["query"]["bool"]["must"][0]["exists"]["field"], "a");
        assert!(body.get("sort").is_none());

        let full: FilterFile = serde_json::from_value(json!({
            "groups": [],
            "sort": [{"field": "ts", "order": "desc"}]
        }))
        .unwrap();
        let body = compile_filter(full);
        assert_eq!(body["query"], esq_core::match_all());
        assert_eq!(body["sort"][0]["ts"]["order"], "desc");
    }

    #[test]
    fn test_slow_threshold_parses_set() {
        let cli = Cli::try_parse_from(["esq", "slow", "threshold", "--set", "750"]).unwrap();
        match cli.command {
            Commands::Slow {
                action: SlowCmd::Threshold { set },
            } => assert_eq!(set, Some(750)),
            _ => panic!("expected slow threshold"),
        }
    }

    #[test]
    fn test_hit_rows_truncate_source() {
        let long = "x".repeat(200);
        let rows = hit_rows(&json!({"hits": [
            {"_id": "1", "_index": "logs", "_score": 1.5, "_source": {"msg": long}}
        ]}));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, "1.500");
        assert_eq!(rows[0].source.chars().count(), 80);
    }

    #[test]
    fn test_similar_rows() {
        let rows = similar_rows(&json!([{
            "similarity": 0.9,
            "entry": {"query_id": "q-1", "index": "logs", "execution_time_ms": 1500, "result_count": 3}
        }]));
        assert_eq!(rows[0].similarity, "0.90");
        assert_eq!(rows[0].entry.execution_ms, 1500);
        assert!(similar_rows(&json!(null)).is_empty());
    }
}
