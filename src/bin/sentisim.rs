use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use sentisim::cache::QueryCache;
use sentisim::config::SimConfig;
use sentisim::dates::date_range;
use sentisim::embedding::OpenAiEmbeddings;
use sentisim::engine::{EngineOptions, SimulationEngine, SimulationOutcome};
use sentisim::evaluate::{
    evaluate, load_ground_truth, write_merged_series, EvalMode, EvalReport,
};
use sentisim::ingest::{load_raw_reviews, run_ingestion, IngestOptions};
use sentisim::llm_client::LlmClient;
use sentisim::persona::generate_balanced_personas;
use sentisim::queries::all_queries;
use sentisim::retriever::TimeFilteredRetriever;
use sentisim::retry::RetryPolicy;
use sentisim::store::ReviewStore;
use sentisim::table::{read_decision_table, write_decision_table};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sentisim=debug")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    let config = SimConfig::load()?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;

    match command {
        "ingest" => {
            let input = args
                .get(2)
                .context("usage: sentisim ingest <reviews.jsonl>")?;
            runtime.block_on(cmd_ingest(&config, Path::new(input)))
        }
        "precompute" => runtime.block_on(cmd_precompute(&config)),
        "simulate" => {
            let static_mode = args.iter().any(|a| a == "--static");
            runtime.block_on(cmd_simulate(&config, static_mode))
        }
        "evaluate" => {
            let decisions = args
                .get(2)
                .context("usage: sentisim evaluate <decisions.csv> [--static]")?;
            let mode = if args.iter().any(|a| a == "--static") {
                EvalMode::Static
            } else {
                EvalMode::Dynamic
            };
            cmd_evaluate(&config, Path::new(decisions), mode)
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command '{}'", other);
        }
    }
}

fn print_usage() {
    eprintln!(
        "sentisim <command>\n\n\
         commands:\n\
         \x20 ingest <reviews.jsonl>          embed reviews into the store\n\
         \x20 precompute                      warm the query embedding cache\n\
         \x20 simulate [--static]             run the persona simulation\n\
         \x20 evaluate <decisions.csv> [--static]  correlate against ground truth\n\n\
         config: sentisim.toml (or SENTISIM_CONFIG), API key via OPENAI_API_KEY"
    );
}

fn embedding_provider(config: &SimConfig) -> Result<Arc<OpenAiEmbeddings>> {
    let api_key = config.require_api_key()?;
    Ok(Arc::new(OpenAiEmbeddings::new(
        config.llm_api_url.clone(),
        api_key,
        config.embedding_model.clone(),
    )))
}

async fn cmd_ingest(config: &SimConfig, input: &Path) -> Result<()> {
    let provider = embedding_provider(config)?;
    let store = Arc::new(ReviewStore::open(&config.store_path)?);

    let (records, malformed) = load_raw_reviews(input)?;
    tracing::info!(
        "loaded {} records from {:?} ({} malformed lines)",
        records.len(),
        input,
        malformed
    );

    let opts = IngestOptions {
        batch_size: config.ingest_batch_size,
        workers: config.ingest_workers,
        language: config.review_language.clone(),
        source_tag: config.source_tag.clone(),
    };
    let report = run_ingestion(store, provider, records, &opts, &RetryPolicy::default()).await?;

    println!(
        "ingested {}/{} records ({} skipped for timestamps, {} filtered, {} failed batches); store now holds {} documents",
        report.written,
        report.total_records,
        report.skipped_timestamp,
        report.filtered_out,
        report.failed_batches,
        report.store_count
    );
    Ok(())
}

async fn cmd_precompute(config: &SimConfig) -> Result<()> {
    let provider = embedding_provider(config)?;
    let cache = QueryCache::open(&config.cache_path, provider);

    let report = cache.precompute(&all_queries()).await?;
    println!(
        "query cache warm: {} requested, {} already cached, {} embedded",
        report.requested, report.already_cached, report.embedded
    );
    Ok(())
}

async fn cmd_simulate(config: &SimConfig, static_mode: bool) -> Result<()> {
    let api_key = config.require_api_key()?;
    let model = Arc::new(LlmClient::new(
        config.llm_api_url.clone(),
        api_key,
        config.llm_model.clone(),
        config.llm_temperature,
    ));
    let opts = EngineOptions {
        max_concurrent: config.max_concurrent,
        top_k: config.top_k,
        product_name: config.product_name.clone(),
    };

    let mut rng = StdRng::from_entropy();
    let personas = generate_balanced_personas(&mut rng, config.n_per_type);
    let (start, end) = config.simulation_dates()?;

    let outcome = if static_mode {
        let engine = SimulationEngine::zero_shot(model, RetryPolicy::default(), opts);
        engine.run(&personas, &[start]).await?
    } else {
        let store_path = config.require_store()?;
        let store = Arc::new(ReviewStore::open(store_path)?);
        let provider = embedding_provider(config)?;
        let cache = Arc::new(QueryCache::open(&config.cache_path, provider));

        // Warm the cache before fanning out so concurrent tasks hit it.
        let warm = cache.precompute(&all_queries()).await?;
        tracing::info!(
            "cache warm before run: {} cached, {} freshly embedded",
            warm.already_cached,
            warm.embedded
        );

        let retriever = Arc::new(TimeFilteredRetriever::new(store, cache));
        let engine = SimulationEngine::time_aware(model, retriever, RetryPolicy::default(), opts);
        let dates = date_range(start, end, config.sim_step_days);
        engine.run(&personas, &dates).await?
    };

    let output = decision_table_path(config, &outcome, static_mode);
    write_decision_table(&outcome.records, &output)?;
    println!(
        "run {}: {} decisions written to {:?} ({} failed tasks)",
        outcome.run_id,
        outcome.records.len(),
        output,
        outcome.failed
    );
    Ok(())
}

fn decision_table_path(config: &SimConfig, outcome: &SimulationOutcome, static_mode: bool) -> PathBuf {
    let variant = if static_mode { "static" } else { "time_aware" };
    Path::new(&config.output_dir).join(format!("decisions_{}_{}.csv", variant, outcome.run_id))
}

fn cmd_evaluate(config: &SimConfig, decisions: &Path, mode: EvalMode) -> Result<()> {
    let records = read_decision_table(decisions)?;
    if records.is_empty() {
        bail!("no decision records in {:?}", decisions);
    }

    let steam = load_ground_truth(Path::new(&config.steam_ground_truth), "Positive_Ratio")?;
    let stock = load_ground_truth(Path::new(&config.stock_ground_truth), "Stock_Price")?;

    let report = evaluate(&records, &steam, &stock, mode);
    print_report(&report, mode);

    let out_dir = Path::new(&config.output_dir);
    write_merged_series(&report.merged_steam, &out_dir.join("merged_steam.csv"))?;
    write_merged_series(&report.merged_stock, &out_dir.join("merged_stock.csv"))?;
    println!("merged series written to {:?} for plotting", out_dir);
    Ok(())
}

fn print_report(report: &EvalReport, mode: EvalMode) {
    println!("========================================");
    match mode {
        EvalMode::Static => {
            println!("mode: static (ratio {:.4})", report.static_ratio.unwrap_or(0.0));
        }
        EvalMode::Dynamic => {
            println!("mode: dynamic ({} joined dates)", report.merged_steam.len());
        }
    }
    println!("correlation (steam): {}", report.steam);
    println!("correlation (stock): {}", report.stock);
    println!("========================================");
}
