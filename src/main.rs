use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use foresight_engine::config::Config;
use foresight_engine::engine::SimulationEngine;
use foresight_engine::graph;
use foresight_engine::llm::LLMClient;
use foresight_engine::report;
use foresight_engine::vision::{GroundingClient, VisionService};

/// Foresight Engine - council-driven scenario simulation over a branching forecast tree
#[derive(Parser, Debug)]
#[command(name = "foresight-engine", version, about)]
struct Args {
    /// Scenario context to simulate
    #[arg(short, long)]
    context: Option<String>,

    /// Seed from a preset scenario instead of free text
    #[arg(long, value_enum, conflicts_with = "context")]
    preset: Option<Preset>,

    /// Image file (PNG/JPEG) providing visual context
    #[arg(long)]
    image: Option<PathBuf>,

    /// Configuration file (TOML); defaults to LLM_* environment variables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Expansion rounds after seeding; each round explores the most probable leaf
    #[arg(long, default_value_t = 0)]
    rounds: u32,

    /// Inject a chaos event into the final expansion round
    #[arg(long)]
    chaos: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "dot")]
    output: Output,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    /// Bitcoin crashes below $30k, triggering a global regulatory crackdown
    CryptoCrash,
    /// A new respiratory virus with a high transmission rate hits major transit hubs
    Pandemic,
    /// The UN bans autonomous AI development above a compute threshold
    AiBan,
}

impl Preset {
    fn context(self) -> &'static str {
        match self {
            Preset::CryptoCrash => {
                "Bitcoin crashes below $30k, triggering global regulatory crackdown."
            }
            Preset::Pandemic => {
                "A new respiratory virus with high transmission rate is detected in major transit hubs."
            }
            Preset::AiBan => {
                "UN passes a resolution banning autonomous AI development above a certain compute threshold."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Output {
    /// Graphviz DOT of the full forecast tree
    Dot,
    /// Markdown report of the deepest explored path
    Report,
}

fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config {
        return Ok(Config::from_file(path)?);
    }
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|_| "set LLM_BASE_URL and LLM_API_KEY or pass --config")?;
    let api_key = std::env::var("LLM_API_KEY")
        .map_err(|_| "set LLM_BASE_URL and LLM_API_KEY or pass --config")?;
    let mut config = Config::default_for_endpoint(base_url, api_key);
    if let Ok(model) = std::env::var("LLM_MODEL") {
        config.reasoning.model = model;
    }
    Ok(config)
}

/// Most probable unexpanded leaf, the path the original UI would click next.
fn most_probable_leaf(engine: &SimulationEngine) -> Option<String> {
    let tree = engine.tree();
    let max_depth = engine.config().engine.max_depth;
    tree.ids()
        .filter_map(|id| tree.get(id))
        .filter(|node| node.depth < max_depth && tree.children_of(&node.id).is_empty())
        .max_by(|a, b| {
            a.payload
                .metrics
                .probability
                .total_cmp(&b.payload.metrics.probability)
        })
        .map(|node| node.id.clone())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let context = match (&args.context, args.preset) {
        (Some(context), _) => context.clone(),
        (None, Some(preset)) => preset.context().to_string(),
        (None, None) => return Err("provide --context or --preset".into()),
    };

    let config = load_config(&args)?;
    let service = Arc::new(LLMClient::new(&config.reasoning)?);

    let image_summary = match &args.image {
        Some(path) => {
            let vision_config = config
                .vision
                .as_ref()
                .ok_or("--image requires a [vision] section in the config file")?;
            let grounding = GroundingClient::new(vision_config)?;
            let bytes = std::fs::read(path)?;
            let summary = grounding.describe(&bytes, Some(&context)).await?;
            info!(summary_length = summary.len(), "visual context grounded");
            Some(summary)
        }
        None => None,
    };

    let mut engine = SimulationEngine::new(config, service)?;

    info!(context = %context, "seeding simulation");
    engine.seed(&context, image_summary.as_deref()).await?;

    for round in 0..args.rounds {
        let Some(leaf) = most_probable_leaf(&engine) else {
            warn!("no expandable leaf left, stopping early");
            break;
        };
        let last_round = round + 1 == args.rounds;
        info!(round = round + 1, node = %leaf, "expanding most probable path");
        if args.chaos && last_round {
            engine.expand_with_chaos(&leaf).await?;
        } else {
            engine.expand(&leaf).await?;
        }
    }

    match args.output {
        Output::Dot => {
            print!("{}", graph::to_dot(&engine.export_graph()));
        }
        Output::Report => {
            let tree = engine.tree();
            let deepest = tree
                .ids()
                .filter_map(|id| tree.get(id))
                .max_by_key(|node| node.depth)
                .map(|node| node.id.clone())
                .ok_or("tree is empty")?;
            print!(
                "{}",
                report::render_path(tree, &deepest, &engine.config().risk_bands)?
            );
        }
    }

    Ok(())
}
