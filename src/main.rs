use anyhow::{Context, Result};
use bloom_agent::{keyword_decision, RoutingMethod};
use bloom_analyzer::QueryAnalyzer;
use bloom_backend::{build_orchestrator, serve, AppConfig, AppState};
use bloom_common::QueryCategory;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "bloom_backend=info,bloom_agent=info,tower_http=info";

#[derive(Parser)]
#[command(name = "bloom")]
#[command(about = "Bloom - menopause wellness assistant backend", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter, e.g. "debug" or "bloom_agent=debug" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Answer one question from the terminal
    Ask {
        /// The question to ask
        query: String,

        /// User whose profile and history are used
        #[arg(short, long, default_value = "cli-user")]
        user_id: String,

        /// Skip routing and ask this agent (consultation, exercise, diet, basic_query)
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Show how a question would be routed by keywords, without calling the model
    Route {
        /// The question to analyze
        query: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => run_server(host, port).await,
        Commands::Ask {
            query,
            user_id,
            category,
        } => ask(&query, &user_id, category.as_deref()).await,
        Commands::Route { query } => {
            route(&query);
            Ok(())
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let orchestrator = build_orchestrator(&config).context("Failed to start Bloom")?;
    let state = AppState::new(Arc::new(orchestrator), &config.server);
    serve(state, &config.server).await
}

async fn ask(query: &str, user_id: &str, category: Option<&str>) -> Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let orchestrator = build_orchestrator(&config).context("Failed to start Bloom")?;

    let reply = match category {
        Some(raw) => {
            let category = QueryCategory::parse_label(raw)
                .with_context(|| format!("Unknown category '{}'", raw))?;
            orchestrator.run_direct(category, query).await?
        }
        None => orchestrator.run_categorization_pipeline(query, user_id).await?,
    };

    println!("{} {}", "Category:".bold(), reply.category.to_string().cyan());
    println!("{} {:?}", "Routing:".bold(), reply.routing.method);
    if reply.error {
        println!("{}", "The model call failed; showing the fallback answer.".yellow());
    }
    println!();
    println!("{}", reply.response);
    Ok(())
}

fn route(query: &str) {
    let analyzed = QueryAnalyzer::new().analyze(query);
    let decision = keyword_decision(&analyzed);

    println!("{} {}", "Query:".bold(), analyzed.normalized);
    if !analyzed.keywords.is_empty() {
        println!("{} {}", "Keywords:".bold(), analyzed.keywords.join(", "));
    }
    println!("{}", "Scores:".bold());
    for score in &analyzed.scores {
        let line = format!("  {:<14} {}", score.category.to_string(), score.score);
        if score.category == decision.category && decision.method == RoutingMethod::Keyword {
            println!("{}", line.green());
        } else {
            println!("{}", line);
        }
    }

    let verdict = match decision.method {
        RoutingMethod::Fallback => format!("{} (no keyword signal)", decision.category),
        _ => decision.category.to_string(),
    };
    println!("{} {}", "Decision:".bold(), verdict.cyan());
}
