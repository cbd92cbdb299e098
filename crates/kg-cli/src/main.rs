//! CLI binary for kgagent: run tool-augmented generation tasks against a SPARQL graph.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kg_agent::batch::{self, BatchOptions};
use kg_agent::{
    Agent, AgentOptions, AnswerTool, BatchProgress, OpenAiCompatibleBackend, TemplateRenderer,
    ToolRegistry, TripleAnswerParser, Task,
};
use kg_core::config::{CallSyntax, KgConfig};
use kg_core::tool::CapabilitySelection;
use kg_store::{GraphStore, KnowledgeGraphTool, SparqlStore};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "kgagent", about = "Tool-augmented generation over a knowledge graph")]
struct Cli {
    /// Project root directory holding .kg/config.toml (defaults to current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task and print the accepted answer
    Ask {
        /// Task template name
        #[arg(short, long, default_value = "entity_linking")]
        task: String,

        /// Template values as key=value (repeatable)
        #[arg(short, long = "arg", value_parser = parse_key_value)]
        args: Vec<(String, String)>,

        /// Identifiers the answer may cite without looking them up (repeatable)
        #[arg(long = "known")]
        known: Vec<String>,

        /// Require the answer to be [label:ID] triples, one per line
        #[arg(long)]
        triples: bool,

        /// Directory of <task>.txt templates
        #[arg(long)]
        template_dir: Option<PathBuf>,

        /// Capabilities to enable, comma-separated, or "all"
        #[arg(short, long, value_delimiter = ',')]
        capabilities: Vec<String>,

        /// Call syntax: json or tag
        #[arg(long)]
        syntax: Option<CallSyntax>,

        /// Print the full conversation after the answer
        #[arg(long)]
        trace: bool,
    },

    /// Generate contradicting triples for every record of an NDJSON file
    Batch {
        /// Input file, one JSON record per line
        input: PathBuf,

        /// First line to process (0-based)
        #[arg(long, default_value = "0")]
        start: usize,

        /// Last line to process, inclusive (defaults to the last line)
        #[arg(long)]
        end: Option<usize>,

        /// Stop after this many successful generations
        #[arg(long)]
        maximum: Option<usize>,

        /// Task template name
        #[arg(short, long, default_value = batch::DEFAULT_TASK)]
        task: String,

        /// Output directory (defaults to <input dir>/<timestamp>-<hash>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory of <task>.txt templates
        #[arg(long)]
        template_dir: Option<PathBuf>,

        /// Capabilities to enable, comma-separated, or "all"
        #[arg(short, long, value_delimiter = ',')]
        capabilities: Vec<String>,

        /// Per-record wall-clock limit in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Check that the SPARQL endpoint answers
    Ping,

    /// List every capability with its parameter schema
    Tools,

    /// Print the effective configuration
    Config,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn get_project_root(cli: &Cli) -> Result<PathBuf> {
    match &cli.project {
        Some(p) => Ok(p.clone()),
        None => std::env::current_dir().context("failed to get current directory"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let project_root = get_project_root(&cli)?;

    match cli.command {
        Commands::Ask {
            task,
            args,
            known,
            triples,
            template_dir,
            capabilities,
            syntax,
            trace,
        } => {
            let mut config = KgConfig::load(&project_root)?;
            if !capabilities.is_empty() {
                config.agent.capabilities = capabilities;
            }
            if let Some(syntax) = syntax {
                config.agent.call_syntax = syntax;
            }
            config.validate()?;
            let mut task = args
                .into_iter()
                .fold(Task::new(task), |t, (k, v)| t.arg(k, v));
            if !known.is_empty() {
                task = task.with_initial_ids(known.into_iter().collect::<BTreeSet<_>>());
            }
            cmd_ask(&config, &task, triples, template_dir.as_deref(), trace).await
        }
        Commands::Batch {
            input,
            start,
            end,
            maximum,
            task,
            output,
            template_dir,
            capabilities,
            timeout,
        } => {
            let mut config = KgConfig::load(&project_root)?;
            if !capabilities.is_empty() {
                config.agent.capabilities = capabilities;
            }
            if timeout.is_some() {
                config.agent.timeout_secs = timeout;
            }
            config.validate()?;
            let options = BatchOptions {
                input,
                start,
                end,
                maximum,
                task,
                output_dir: output,
            };
            cmd_batch(&config, &options, template_dir.as_deref()).await
        }
        Commands::Ping => cmd_ping(&KgConfig::load(&project_root)?).await,
        Commands::Tools => cmd_tools(),
        Commands::Config => {
            print!("{}", KgConfig::load(&project_root)?.to_toml()?);
            Ok(())
        }
    }
}

fn open_store(config: &KgConfig) -> Result<Arc<SparqlStore>> {
    let store = SparqlStore::new(&config.store).context("failed to set up SPARQL client")?;
    Ok(Arc::new(store))
}

async fn probe(store: &SparqlStore) -> Result<()> {
    store
        .ping()
        .await
        .with_context(|| format!("SPARQL endpoint {} is not reachable", store.endpoint()))
}

fn build_agent(
    config: &KgConfig,
    store: Arc<dyn GraphStore>,
    triples: bool,
    template_dir: Option<&Path>,
) -> Result<Agent> {
    let graph_tool = KnowledgeGraphTool::new(store, config.store.search_limit);
    let answer_tool = if triples {
        AnswerTool::with_validator(Arc::new(TripleAnswerParser))
    } else {
        AnswerTool::new()
    };
    let registry = ToolRegistry::builder()
        .with_tool(
            Arc::new(graph_tool),
            &CapabilitySelection::from_names(&config.agent.capabilities),
        )?
        .with_tool(Arc::new(answer_tool), &CapabilitySelection::All)?
        .build();

    let backend = OpenAiCompatibleBackend::new(&config.generation, &config.agent.tool_result_role)
        .context("failed to set up generation client")?;
    let renderer = match template_dir {
        Some(dir) => TemplateRenderer::with_dir(dir),
        None => TemplateRenderer::new(),
    };
    Ok(Agent::new(
        Arc::new(backend),
        registry,
        Arc::new(renderer),
        AgentOptions::from_config(config),
    ))
}

async fn cmd_ask(
    config: &KgConfig,
    task: &Task,
    triples: bool,
    template_dir: Option<&Path>,
    trace: bool,
) -> Result<()> {
    let store = open_store(config)?;
    probe(&store).await?;
    let agent = build_agent(config, store, triples, template_dir)?;

    let report = agent.run(task).await?;
    info!(
        "Answer accepted after {} iteration(s) with {}",
        report.iterations,
        agent.registry().names().collect::<Vec<_>>().join(", ")
    );
    println!("{}", serde_json::to_string_pretty(&report.answer)?);

    if trace {
        eprintln!();
        for message in &report.trace {
            eprintln!("--- {:?}", message.role);
            eprintln!("{}", message.content.to_text());
        }
    }
    Ok(())
}

async fn cmd_batch(
    config: &KgConfig,
    options: &BatchOptions,
    template_dir: Option<&Path>,
) -> Result<()> {
    let store = open_store(config)?;
    probe(&store).await?;
    let agent = build_agent(config, store, true, template_dir)?;

    let total = batch::progress_total(options)?;
    let progress = BatchProgress::new(total, "Generating");
    let header = config.to_toml()?;
    let summary = batch::run_batch(&agent, options, &header, &progress).await?;

    info!(
        output = %summary.output_file.display(),
        log = %summary.log_file.display(),
        "Generated {}/{} record(s)",
        summary.generated,
        summary.processed
    );
    Ok(())
}

async fn cmd_ping(config: &KgConfig) -> Result<()> {
    let store = open_store(config)?;
    let started = std::time::Instant::now();
    probe(&store).await?;
    println!(
        "{} answered in {} ms",
        store.endpoint(),
        started.elapsed().as_millis()
    );
    Ok(())
}

fn cmd_tools() -> Result<()> {
    let tables = [
        KnowledgeGraphTool::capability_table(),
        AnswerTool::capability_table(),
    ];
    for spec in tables.into_iter().flatten() {
        let flag = if spec.exposed { "" } else { " (internal)" };
        println!("{}{}", spec.name, flag);
        println!("  {}", spec.description);
        println!(
            "  {}",
            serde_json::to_string(&(spec.parameters)()).context("failed to render schema")?
        );
    }
    Ok(())
}
