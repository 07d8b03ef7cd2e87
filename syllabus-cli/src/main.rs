//! syllabus-cli - command-line client for the Syllabus HTTP API
//!
//! # Subcommands
//! - `ask <query> [--session <id>] [--json]` - answer a question about the courses
//! - `courses [--json]`                      - list ingested courses
//! - `ingest [--path <dir>] [--clear]`       - ingest a folder of course files
//! - `clear-session [--session <id>]`        - drop a session, print a fresh id
//! - `status`                                - show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "syllabus-cli",
    version,
    about = "Ask questions about course materials"
)]
struct Cli {
    /// Syllabus HTTP server URL (overrides SYLLABUS_HTTP_URL env var)
    #[arg(long, env = "SYLLABUS_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ask a question about the course materials
    Ask {
        query: String,

        /// Continue an existing conversation
        #[arg(long, env = "SYLLABUS_SESSION")]
        session: Option<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// List ingested courses
    Courses {
        #[arg(long)]
        json: bool,
    },

    /// Ingest a folder of course files (server's docs folder by default)
    Ingest {
        /// Folder inside the server's docs folder, absolute or relative to it
        #[arg(long)]
        path: Option<String>,

        /// Clear all stored courses first
        #[arg(long)]
        clear: bool,
    },

    /// Clear a conversation and print a fresh session id
    ClearSession {
        #[arg(long, env = "SYLLABUS_SESSION")]
        session: Option<String>,
    },

    /// Show Syllabus server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SourceItem {
    pub text: String,
    pub link: Option<String>,
}

/// Response from POST /api/query
#[derive(Debug, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub sources: Vec<SourceItem>,
    pub session_id: String,
}

/// Response from GET /api/courses
#[derive(Debug, Deserialize)]
pub struct CoursesResponse {
    pub total_courses: usize,
    pub course_titles: Vec<String>,
}

/// Response from POST /api/ingest
#[derive(Debug, Deserialize)]
pub struct IngestResponse {
    pub courses_added: usize,
    pub chunks_added: usize,
    pub skipped: usize,
    #[serde(default)]
    pub failed: Vec<String>,
}

// ============================================================================
// Output formatting
// ============================================================================

pub fn format_answer(resp: &AnswerResponse) -> String {
    let mut out = resp.answer.trim().to_string();
    if !resp.sources.is_empty() {
        out.push_str("\n\nSources:");
        for source in &resp.sources {
            match &source.link {
                Some(link) => out.push_str(&format!("\n  - {} <{}>", source.text, link)),
                None => out.push_str(&format!("\n  - {}", source.text)),
            }
        }
    }
    out.push_str(&format!("\n\nsession: {}", resp.session_id));
    out
}

pub fn format_courses(resp: &CoursesResponse) -> String {
    if resp.total_courses == 0 {
        return "No courses ingested".to_string();
    }
    let mut out = format!("{} course(s):", resp.total_courses);
    for title in &resp.course_titles {
        out.push_str(&format!("\n  {}", title));
    }
    out
}

pub fn format_ingest(resp: &IngestResponse) -> String {
    let mut out = format!(
        "Added {} course(s), {} chunk(s); {} already present",
        resp.courses_added, resp.chunks_added, resp.skipped
    );
    for path in &resp.failed {
        out.push_str(&format!("\n  failed: {}", path));
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

/// Sends the request and exits with a message on connection or HTTP failure.
fn send_or_exit(
    request: reqwest::blocking::RequestBuilder,
    url: &str,
) -> reqwest::blocking::Response {
    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("syllabus-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body: serde_json::Value = resp.json().unwrap_or_default();
        let message = body["error"].as_str().unwrap_or("no details");
        eprintln!("syllabus-cli: server returned {}: {}", status, message);
        std::process::exit(1);
    }
    resp
}

fn do_ask(server: &str, query: &str, session: Option<&str>, json_output: bool) -> anyhow::Result<()> {
    // generation can take several tool rounds
    let client = client(120)?;
    let url = format!("{}/api/query", server);
    let body = serde_json::json!({
        "query": query,
        "session_id": session,
    });

    let resp = send_or_exit(client.post(&url).json(&body), &url);

    if json_output {
        let raw: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&raw)?);
        return Ok(());
    }

    let answer: AnswerResponse = match resp.json() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("syllabus-cli: failed to parse answer: {}", e);
            std::process::exit(1);
        }
    };
    println!("{}", format_answer(&answer));
    Ok(())
}

fn do_courses(server: &str, json_output: bool) -> anyhow::Result<()> {
    let client = client(10)?;
    let url = format!("{}/api/courses", server);
    let resp = send_or_exit(client.get(&url), &url);

    if json_output {
        let raw: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&raw)?);
    } else {
        let courses: CoursesResponse = resp.json()?;
        println!("{}", format_courses(&courses));
    }
    Ok(())
}

fn do_ingest(server: &str, path: Option<&str>, clear: bool) -> anyhow::Result<()> {
    // every chunk is embedded before the response comes back
    let client = client(600)?;
    let url = format!("{}/api/ingest", server);
    let body = serde_json::json!({
        "path": path,
        "clear_existing": clear,
    });

    let resp = send_or_exit(client.post(&url).json(&body), &url);
    let report: IngestResponse = resp.json()?;
    println!("{}", format_ingest(&report));
    Ok(())
}

fn do_clear_session(server: &str, session: Option<&str>) -> anyhow::Result<()> {
    let client = client(10)?;
    let url = format!("{}/api/session/clear", server);
    let mut request = client.post(&url);
    if let Some(id) = session {
        request = request.query(&[("session_id", id)]);
    }

    let resp = send_or_exit(request, &url);
    let body: serde_json::Value = resp.json()?;
    println!("{}", body["session_id"].as_str().unwrap_or(""));
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = client(10)?;
    let url = format!("{}/health", server);

    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Syllabus server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
            println!("Vector store:    {}", body["vector_store"].as_str().unwrap_or("?"));
            println!("Chunks:          {}", body["chunks"].as_u64().unwrap_or(0));
        }
        Ok(r) => {
            eprintln!("syllabus-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("syllabus-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Ask {
            query,
            session,
            json,
        } => do_ask(&server, &query, session.as_deref(), json),
        Commands::Courses { json } => do_courses(&server, json),
        Commands::Ingest { path, clear } => do_ingest(&server, path.as_deref(), clear),
        Commands::ClearSession { session } => do_clear_session(&server, session.as_deref()),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("syllabus-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
