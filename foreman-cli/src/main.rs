//! foreman-cli — operator frontend for the Foreman voice command engine
//!
//! Sends transcripts and queries to the engine's HTTP API and prints the
//! composed reply, for exercising the pipeline without a speech channel.
//!
//! # Subcommands
//! - `say <transcript> [--session <uuid>] [--json]` — run one command
//! - `search <query> [-n <limit>] [--json]`         — ranked memory search
//! - `close <session>`                               — archive a session
//! - `status`                                        — show engine health

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8790";
const DEFAULT_LIMIT: u32 = 5;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "foreman-cli",
    version,
    about = "Foreman voice command engine — operator CLI"
)]
struct Cli {
    /// Foreman HTTP server URL (overrides FOREMAN_HTTP_URL env var)
    #[arg(long, env = "FOREMAN_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one transcript through the pipeline
    Say {
        /// The transcript to process
        transcript: String,

        /// Session to continue; omit to start a new one
        #[arg(long)]
        session: Option<String>,

        /// Recognizer confidence to attach
        #[arg(long)]
        confidence: Option<f32>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Search the retrieval memory
    Search {
        /// Query text to search for
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: u32,

        /// Restrict results to one asset
        #[arg(long)]
        asset: Option<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Close and archive a session
    Close {
        /// Session id to close
        session: String,
    },

    /// Show engine health
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct CommandResponse {
    session_id: String,
    state: String,
    reply: ReplyPayload,
    took_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ReplyPayload {
    text: String,
    action: Option<serde_json::Value>,
    clarification: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
    count: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    text: String,
    score: f64,
    asset_id: Option<String>,
}

// ============================================================================
// Main
// ============================================================================

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::blocking::Client::new();

    match cli.command {
        Commands::Say {
            transcript,
            session,
            confidence,
            json,
        } => {
            let body = serde_json::json!({
                "transcript": transcript,
                "session_id": session,
                "confidence": confidence,
            });
            let raw: serde_json::Value = client
                .post(format!("{}/command", cli.server))
                .json(&body)
                .send()
                .context("Failed to reach Foreman server")?
                .json()
                .context("Invalid response from server")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&raw)?);
                return Ok(());
            }

            let parsed: CommandResponse =
                serde_json::from_value(raw).context("Unexpected response shape")?;

            println!("{}", parsed.reply.text);
            if parsed.reply.clarification {
                println!("  (clarification requested)");
            }
            if let Some(action) = parsed.reply.action {
                println!("  action: {}", serde_json::to_string(&action)?);
            }
            println!(
                "  session: {}  state: {}  took: {}ms",
                parsed.session_id,
                parsed.state,
                parsed.took_ms.unwrap_or(0)
            );
        }

        Commands::Search {
            query,
            limit,
            asset,
            json,
        } => {
            let body = serde_json::json!({
                "query": query,
                "limit": limit,
                "asset_id": asset,
            });
            let raw: serde_json::Value = client
                .post(format!("{}/memory/search", cli.server))
                .json(&body)
                .send()
                .context("Failed to reach Foreman server")?
                .json()
                .context("Invalid response from server")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&raw)?);
                return Ok(());
            }

            let parsed: SearchResponse =
                serde_json::from_value(raw).context("Unexpected response shape")?;

            if parsed.results.is_empty() {
                println!("No matching records.");
                return Ok(());
            }
            for result in &parsed.results {
                let asset = result.asset_id.as_deref().unwrap_or("-");
                println!("{:.3}  [{}]  {}", result.score, asset, result.text);
            }
            println!("{} result(s)", parsed.count);
        }

        Commands::Close { session } => {
            let body = serde_json::json!({ "session_id": session });
            let response = client
                .post(format!("{}/session/close", cli.server))
                .json(&body)
                .send()
                .context("Failed to reach Foreman server")?;

            if response.status().is_success() {
                println!("Session {} closed and archived.", session);
            } else {
                bail!("Close failed: {}", response.status());
            }
        }

        Commands::Status => {
            let raw: serde_json::Value = client
                .get(format!("{}/health", cli.server))
                .send()
                .context("Failed to reach Foreman server")?
                .json()
                .context("Invalid response from server")?;

            println!(
                "status: {}",
                raw.get("status").and_then(|s| s.as_str()).unwrap_or("unknown")
            );
            println!(
                "sessions: {}  memory records: {}",
                raw.get("sessions").and_then(|v| v.as_u64()).unwrap_or(0),
                raw.get("memory_records").and_then(|v| v.as_u64()).unwrap_or(0),
            );
            if let Some(providers) = raw.get("providers").and_then(|p| p.as_array()) {
                let names: Vec<&str> = providers.iter().filter_map(|p| p.as_str()).collect();
                println!("providers: {}", names.join(", "));
            }
        }
    }

    Ok(())
}
