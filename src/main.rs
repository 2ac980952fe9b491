use clap::{Parser, Subcommand};
use tracing::error;

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;

use event_scout::cache::CorpusCache;
use event_scout::config::Config;
use event_scout::domain::Location;
use event_scout::feed::FeedClient;
use event_scout::filter::filter_events;
use event_scout::geo::format_distance;
use event_scout::llm::{ChatModel, CohereChat, StaticChatModel};
use event_scout::rank::rank_and_limit;
use event_scout::rate_limit::RateLimiter;
use event_scout::reconcile::{extract_filters, ExtractionRequest};
use event_scout::server::{self, AppState};
use event_scout::{logging, observability};

#[derive(Parser)]
#[command(name = "event_scout")]
#[command(about = "Toronto local event discovery backend")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Fetch the feed once and report what the pipeline produced
    Fetch,
    /// Search the live corpus from the command line
    Search {
        /// Natural-language query, e.g. "free music this weekend"
        query: String,
        /// Maximum number of results to print
        #[arg(long, default_value_t = 10)]
        max_results: usize,
    },
}

fn build_cache(config: &Config) -> CorpusCache {
    CorpusCache::new(
        FeedClient::new(config.feed.endpoint.clone()),
        Duration::from_secs(config.feed.revalidate_seconds),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    logging::init_logging();
    observability::init_metrics();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let model: Option<Arc<dyn ChatModel>> = match CohereChat::from_env() {
                Some(model) => Some(Arc::new(model)),
                None => {
                    println!("⚠️  COHERE_API_KEY not set; natural-language search is disabled");
                    None
                }
            };
            let state = Arc::new(AppState {
                cache: build_cache(&config),
                limiter: RateLimiter::new(&config.rate_limit),
                model,
                config,
            });
            server::start_server(state, port).await?;
        }
        Commands::Fetch => {
            println!("🔄 Fetching events feed...");
            let cache = build_cache(&config);
            match cache.snapshot().await {
                Ok(corpus) => {
                    println!("\n📊 Corpus summary:");
                    println!("   Events:     {}", corpus.events.len());
                    println!("   Themes:     {}", corpus.themes.join(", "));
                    println!("   Categories: {}", corpus.categories.join(", "));
                }
                Err(e) => {
                    error!("Feed fetch failed: {}", e);
                    println!("❌ Feed fetch failed: {}", e);
                }
            }
        }
        Commands::Search { query, max_results } => {
            let cache = build_cache(&config);
            let corpus = match cache.snapshot().await {
                Ok(corpus) => corpus,
                Err(e) => {
                    error!("Feed fetch failed: {}", e);
                    println!("❌ Feed fetch failed: {}", e);
                    return Ok(());
                }
            };

            // Offline extraction: the silent model path lands on the same
            // deterministic fallbacks the server uses when the API errors.
            let model: Arc<dyn ChatModel> = match CohereChat::from_env() {
                Some(model) => Arc::new(model),
                None => Arc::new(StaticChatModel::silent()),
            };
            let request = ExtractionRequest {
                query: &query,
                available_themes: &corpus.themes,
                available_categories: &corpus.categories,
                chat_context: &[],
            };
            let extraction =
                extract_filters(model.as_ref(), &request, Local::now().date_naive()).await;
            println!("🔎 Filters: {}", serde_json::to_string(&extraction.filters)?);

            let matched = filter_events(&corpus.events, &extraction.filters);
            let reference = Location {
                lat: config.search.reference_lat,
                lng: config.search.reference_lng,
            };
            let ranked = rank_and_limit(
                &matched,
                max_results,
                reference,
                Local::now().naive_local(),
                config.search.tie_break_threshold,
            );

            if ranked.is_empty() {
                println!("No matching events.");
            } else {
                println!("\n📅 Top {} of {} matching events:", ranked.len(), matched.len());
                for scored in &ranked {
                    println!(
                        "   {}  {}",
                        format_distance(scored.distance_miles),
                        scored.event.summary()
                    );
                }
            }
        }
    }

    Ok(())
}
