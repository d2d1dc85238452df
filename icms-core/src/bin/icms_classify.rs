//! `icms-classify`: command-line entry point for running classification
//! batches, reloading the Knowledge Base, and promoting confirmed
//! Classifications to the Golden Set.

use clap::{Parser, Subcommand};
use icms_core::config::Config;
use icms_core::domain::ids::{ClassificationId, ProductId, TenantId};
use icms_core::domain::product::Product;
use icms_core::kb::{default_sources, load_snapshot, KbHandle};
use icms_core::llm::{AnthropicClient, ClientConfig, LLMClient};
use icms_core::{golden_set, AuditStore, Dispatcher, WorkflowOrchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "icms-classify", about = "NCM/CEST fiscal classification engine")]
struct Cli {
    /// Path to a TOML configuration file; defaults are used when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path for the Audit store and Golden Set.
    #[arg(long, global = true, default_value = "icms.db")]
    db: PathBuf,

    /// Directory holding the Knowledge Base source files (ncm.json,
    /// cest.json, product_examples.json).
    #[arg(long, global = true, default_value = "kb-data")]
    kb_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submits a Dispatcher job for a tenant's products.
    Run {
        #[arg(long)]
        tenant: String,
        /// JSON file containing a `Product` array.
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        resume: bool,
        #[arg(long)]
        force_reclassify: bool,
    },
    /// Reloads the Knowledge Base from source files and swaps the snapshot.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },
    /// Promotes a Classification to the Golden Set.
    Golden {
        #[command(subcommand)]
        action: GoldenAction,
    },
}

#[derive(Subcommand)]
enum KbAction {
    Load {
        /// Directory containing the Knowledge Base source files.
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum GoldenAction {
    Promote {
        classification_id: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        gtin: Option<String>,
        #[arg(long, default_value = "cli")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "icms-classify failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> icms_core::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run { tenant, input, limit, resume, force_reclassify } => {
            config.resume = resume || config.resume;
            config.force_reclassify = force_reclassify;
            run_dispatch(&cli.db, &cli.kb_dir, &tenant, &input, limit, config).await
        }
        Command::Kb { action: KbAction::Load { path } } => load_kb(&path, &config).await,
        Command::Golden { action: GoldenAction::Promote { classification_id, tenant, description, gtin, user } } => {
            promote(&cli.db, &classification_id, &tenant, &description, gtin, &user)
        }
    }
}

fn build_llm_client() -> Arc<dyn LLMClient> {
    let api_key = std::env::var("ICMS_ANTHROPIC_API_KEY").unwrap_or_default();
    Arc::new(AnthropicClient::new(ClientConfig::new(api_key)))
}

async fn run_dispatch(db: &PathBuf, kb_dir: &PathBuf, tenant: &str, input: &PathBuf, limit: Option<usize>, config: Config) -> icms_core::Result<()> {
    let raw = std::fs::read_to_string(input)
        .map_err(|e| icms_core::Error::input(format!("reading products file {}: {e}", input.display())))?;
    let mut products: Vec<Product> = serde_json::from_str(&raw)?;
    if let Some(limit) = limit {
        products.truncate(limit);
    }
    products.sort_by(|a, b| a.product_id.0.cmp(&b.product_id.0));

    let llm = build_llm_client();
    let sources = default_sources(kb_dir);
    let snapshot = load_snapshot(&sources, llm.as_ref(), &config.models.default, 1).await?;
    let kb = Arc::new(KbHandle::new(snapshot));

    let audit = Arc::new(AuditStore::open(db)?);
    let orchestrator = Arc::new(WorkflowOrchestrator::new(llm.clone(), kb, config.clone()));
    let dispatcher = Dispatcher::new(orchestrator, Arc::clone(&audit), llm, config);

    let tenant_id = TenantId(tenant.to_string());
    let cancel = Arc::new(AtomicBool::new(false));
    let report = dispatcher.run(&tenant_id, products, cancel).await?;

    println!(
        "processed={} skipped={} manual_review={} failed={} partial_success={}",
        report.processed, report.skipped, report.manual_review, report.failed, report.partial_success
    );
    Ok(())
}

/// Validates that the source files at `path` load into a consistent
/// `KbSnapshot`. A long-running server process holds the resulting handle
/// in memory (§4.1); this one-shot command is the pre-flight check an
/// operator runs before restarting one.
async fn load_kb(path: &PathBuf, config: &Config) -> icms_core::Result<()> {
    let llm = build_llm_client();
    let sources = default_sources(path);
    let snapshot = load_snapshot(&sources, llm.as_ref(), &config.models.default, 1).await?;
    println!("knowledge base loaded, generation {}", snapshot.generation);
    Ok(())
}

fn promote(db: &PathBuf, classification_id: &str, tenant: &str, description: &str, gtin: Option<String>, user: &str) -> icms_core::Result<()> {
    let audit = AuditStore::open(db)?;
    let uuid = uuid::Uuid::parse_str(classification_id)
        .map_err(|e| icms_core::Error::input(format!("invalid classification id {classification_id}: {e}")))?;
    let classification_id = ClassificationId::from(uuid);

    let Some(classification) = audit.classification_by_id(classification_id)? else {
        return Err(icms_core::Error::input(format!("no classification found with id {classification_id}")));
    };

    let product = Product {
        product_id: ProductId(classification.product_id.0.clone()),
        tenant_id: TenantId(tenant.to_string()),
        description_raw: description.to_string(),
        internal_code: None,
        barcode: gtin,
        ncm_declared: None,
        cest_declared: None,
        company_activity: None,
    };

    let store = icms_core::kb::StructuredStore::open(db)?;
    let entry = golden_set::promote_classification(&store, &product, &classification, None, user)?;
    println!("promoted classification {} to golden set entry {} (version {})", classification_id, entry.entry_id, entry.version);
    Ok(())
}
