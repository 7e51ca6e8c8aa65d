//! wayfinder-cli: talk to a running Wayfinder server over its HTTP API
//!
//! # Subcommands
//! - `query <text> [-k <top_k>] [--json]`               : document-grounded answer
//! - `ask <text> --user <id> [-k <top_k>] [--json]`     : personalized answer
//! - `search <text> [--user <id>] [-k <top_k>] [--json]`: retrieval only
//! - `insights <text> --user <id> [--json]`             : personalization insights
//! - `ingest <path>`                                    : ingest an NDJSON corpus on the server host
//! - `status`                                           : show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";
const DEFAULT_TOP_K: usize = 5;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "wayfinder-cli", version, about = "Wayfinder travel assistant CLI")]
struct Cli {
    /// Wayfinder HTTP server URL (overrides WAYFINDER_HTTP_URL env var)
    #[arg(long, env = "WAYFINDER_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ask a question answered from the travel documents
    Query {
        query: String,

        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Ask a question personalized with a user's profile and history
    Ask {
        query: String,

        #[arg(short, long)]
        user: String,

        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        #[arg(long)]
        json: bool,
    },

    /// Retrieve matching chunks without generating an answer
    Search {
        query: String,

        /// Also search this user's memory
        #[arg(short, long)]
        user: Option<String>,

        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show how an answer for this user would be personalized
    Insights {
        query: String,

        #[arg(short, long)]
        user: String,

        #[arg(long)]
        json: bool,
    },

    /// Ingest an NDJSON corpus (path on the server host)
    Ingest { path: String },

    /// Show Wayfinder server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Hit {
    pub id: String,
    pub distance: f32,
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerResponse {
    pub response_text: String,
    #[serde(default)]
    pub hits: Vec<Hit>,
    #[serde(default)]
    pub document_hits: Vec<Hit>,
    #[serde(default)]
    pub personal_hits: Vec<Hit>,
    #[serde(default)]
    pub degradations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    #[serde(default)]
    pub failures: Vec<Value>,
    pub took_ms: Option<u64>,
}

// ============================================================================
// Formatting
// ============================================================================

/// First `max` characters of `text` on one line.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}…", flat.chars().take(max).collect::<String>())
    }
}

pub fn format_hit(hit: &Hit) -> String {
    let source = hit.source.as_deref().map(|s| format!("[{}] ", s)).unwrap_or_default();
    format!(
        "{}{}  (distance {:.3})\n    {}",
        source,
        hit.id,
        hit.distance,
        preview(&hit.text, 160)
    )
}

pub fn format_answer(answer: &AnswerResponse) -> String {
    let mut out = format!("{}\n", answer.response_text.trim());

    let sources: Vec<&Hit> = answer
        .hits
        .iter()
        .chain(&answer.document_hits)
        .chain(&answer.personal_hits)
        .collect();
    if !sources.is_empty() {
        out.push_str("\nSources:\n");
        for hit in sources {
            out.push_str(&format!("  - {}\n", hit.id));
        }
    }

    let kinds: Vec<&str> = answer
        .degradations
        .iter()
        .filter_map(|d| d["kind"].as_str())
        .collect();
    if !kinds.is_empty() {
        out.push_str(&format!("\nNotes: {}\n", kinds.join(", ")));
    }
    out
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST a JSON body and return the decoded response. Exits on transport or
/// server errors.
fn post_json(server: &str, route: &str, body: Value) -> anyhow::Result<Value> {
    let url = format!("{}{}", server, route);
    let resp = match client(120)?.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("wayfinder-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("wayfinder-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    Ok(resp.json()?)
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn do_answer(server: &str, route: &str, body: Value, json_output: bool) -> anyhow::Result<()> {
    let value = post_json(server, route, body)?;
    if json_output {
        return print_json(&value);
    }
    let answer: AnswerResponse = serde_json::from_value(value)?;
    print!("{}", format_answer(&answer));
    Ok(())
}

fn do_search(
    server: &str,
    query: &str,
    user: Option<String>,
    top_k: usize,
    json_output: bool,
) -> anyhow::Result<()> {
    let value = post_json(
        server,
        "/search",
        json!({ "query": query, "top_k": top_k, "user_id": user }),
    )?;
    if json_output {
        return print_json(&value);
    }

    let search: SearchResponse = serde_json::from_value(value)?;
    if search.hits.is_empty() {
        eprintln!("No results found for: {}", query);
    }
    for hit in &search.hits {
        println!("{}\n", format_hit(hit));
    }
    for failure in &search.failures {
        eprintln!(
            "wayfinder-cli: {} failed: {}",
            failure["source"].as_str().unwrap_or("?"),
            failure["error"].as_str().unwrap_or("?")
        );
    }
    if let Some(ms) = search.took_ms {
        eprintln!("({} ms)", ms);
    }
    Ok(())
}

fn do_insights(server: &str, query: &str, user: &str, json_output: bool) -> anyhow::Result<()> {
    let value = post_json(server, "/insights", json!({ "query": query, "user_id": user }))?;
    if json_output {
        return print_json(&value);
    }

    println!(
        "User context:   {}",
        if value["has_user_context"].as_bool().unwrap_or(false) { "yes" } else { "no" }
    );
    println!("Budget range:   {}", value["preferences"]["budget_range"].as_str().unwrap_or("?"));
    println!("Travel style:   {}", value["preferences"]["travel_style"].as_str().unwrap_or("?"));
    if let Some(experiences) = value["relevant_experiences"].as_array() {
        for e in experiences {
            println!(
                "Past trip:      {} ({})",
                e["destination"].as_str().unwrap_or("?"),
                e["year"]
            );
        }
    }
    if let Some(summary) = value["profile_summary"].as_str() {
        println!("\n{}", summary);
    }
    Ok(())
}

fn do_ingest(server: &str, path: &str) -> anyhow::Result<()> {
    let value = post_json(server, "/ingest", json!({ "path": path }))?;
    println!("Chunks stored:      {}", value["chunks_stored"]);
    println!("Datapoints indexed: {}", value["datapoints_upserted"]);
    println!("Failed embeddings:  {}", value["failed_embeddings"]);
    if let Some(corpus) = value.get("corpus") {
        println!("Documents:          {}", corpus["documents"]);
        println!("Malformed lines:    {}", corpus["malformed_lines"]);
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = match client(10)?.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("wayfinder-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let code = resp.status();
    let body: Value = resp.json().unwrap_or_default();
    println!("Wayfinder server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
    println!(
        "Documents:        {} ({} chunks, index {})",
        ready_label(&body["documents"]["ready"]),
        body["documents"]["chunks"],
        body["documents"]["index"].as_str().unwrap_or("?")
    );
    println!(
        "Memory:           {} ({} chunks, {} users)",
        ready_label(&body["memory"]["ready"]),
        body["memory"]["chunks"],
        body["memory"]["users"]
    );
    println!("Embedding:        {}", body["embedding"].as_str().unwrap_or("?"));

    if !code.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn ready_label(v: &Value) -> &'static str {
    if v.as_bool().unwrap_or(false) {
        "ready"
    } else {
        "not ready"
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Query { query, top_k, json } => {
            do_answer(&server, "/query", json!({ "query": query, "top_k": top_k }), json)
        }
        Commands::Ask {
            query,
            user,
            top_k,
            json,
        } => do_answer(
            &server,
            "/ask",
            json!({ "query": query, "user_id": user, "top_k": top_k }),
            json,
        ),
        Commands::Search {
            query,
            user,
            top_k,
            json,
        } => do_search(&server, &query, user, top_k, json),
        Commands::Insights { query, user, json } => do_insights(&server, &query, &user, json),
        Commands::Ingest { path } => do_ingest(&server, &path),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("wayfinder-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, text: &str, source: Option<&str>) -> Hit {
        Hit {
            id: id.to_string(),
            distance: 0.25,
            text: text.to_string(),
            source: source.map(str::to_string),
        }
    }

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("a\n  b\tc", 10), "a b c");
        assert_eq!(preview(&"x".repeat(20), 5), "xxxxx…");
    }

    #[test]
    fn test_format_hit_includes_source_and_distance() {
        let line = format_hit(&hit("user_001_travel_preferences", "Budget: luxury", Some("user_memory")));
        assert!(line.starts_with("[user_memory] user_001_travel_preferences"));
        assert!(line.contains("0.250"));
        assert!(line.contains("Budget: luxury"));
    }

    #[test]
    fn test_answer_response_parses_query_result() {
        let value = json!({
            "response_text": "Stay at the Alvear Palace.",
            "hits": [{ "id": "h_chunk_0", "distance": 0.1, "text": "Palace", "metadata": {}, "rehydrated": true }],
            "context": "...",
            "augmented_prompt": "...",
            "path": "grounded",
            "degradations": []
        });
        let answer: AnswerResponse = serde_json::from_value(value).unwrap();
        let out = format_answer(&answer);
        assert!(out.starts_with("Stay at the Alvear Palace."));
        assert!(out.contains("  - h_chunk_0"));
        assert!(!out.contains("Notes:"));
    }

    #[test]
    fn test_format_answer_lists_degradations() {
        let answer: AnswerResponse = serde_json::from_value(json!({
            "response_text": "General advice.",
            "personal_hits": [],
            "document_hits": [],
            "degradations": [{ "kind": "no_profile" }, { "kind": "no_user_context" }]
        }))
        .unwrap();
        let out = format_answer(&answer);
        assert!(out.contains("Notes: no_profile, no_user_context"));
        assert!(!out.contains("Sources:"));
    }

    #[test]
    fn test_search_response_parses_dispatch_result() {
        let search: SearchResponse = serde_json::from_value(json!({
            "hits": [{ "source": "documents", "id": "a", "distance": 0.2, "text": "t", "metadata": {}, "rehydrated": true }],
            "failures": [],
            "skipped": [],
            "took_ms": 4
        }))
        .unwrap();
        assert_eq!(search.hits[0].source.as_deref(), Some("documents"));
        assert_eq!(search.took_ms, Some(4));
    }
}
