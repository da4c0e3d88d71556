use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cadre_core::config::AppConfig;
use cadre_core::cycle::CycleResult;
use cadre_core::event::CycleEvent;
use cadre_core::plan::WorkflowGraph;
use cadre_core::types::{ModelOverrides, ToolDescriptor};
use cadre_engine::{schedule, validate, Conductor, CycleRequest};

#[derive(Parser)]
#[command(name = "cadre", version, about = "Design, simulate, and refine multi-agent workflows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cadre.toml", env = "CADRE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan, simulate, evaluate, and revise a workflow for a task
    Run {
        /// Task description (read from stdin when empty)
        #[arg(trailing_var_arg = true)]
        task: Vec<String>,
        /// Score a run must reach to stop early
        #[arg(long)]
        target_score: Option<f64>,
        /// Maximum plan/simulate/evaluate passes
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Extra tool available to agents (repeatable)
        #[arg(long = "tool")]
        tools: Vec<String>,
        /// Print the full cycle result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a validated workflow design for a task as JSON
    Design {
        #[arg(trailing_var_arg = true)]
        task: Vec<String>,
    },
    /// Decide whether a task warrants a multi-agent workflow
    Assess {
        #[arg(trailing_var_arg = true)]
        task: Vec<String>,
    },
    /// Validate a workflow graph file and print its execution tiers
    Validate {
        /// Path to a JSON workflow graph
        graph: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cadre=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that need no config
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "cadre", &mut io::stdout());
            return Ok(());
        }
        Commands::Validate { graph } => return validate_file(graph),
        _ => {}
    }

    let config = AppConfig::load(&cli.config)?;
    info!(config = %cli.config.display(), provider = %config.model.provider, "Config loaded");

    match cli.command {
        Commands::Config => {
            let mut shown = config.clone();
            for model in std::iter::once(&mut shown.model)
                .chain(shown.fallback_models.iter_mut())
                .chain(shown.roles.planner.iter_mut())
                .chain(shown.roles.coder.iter_mut())
                .chain(shown.roles.evaluator.iter_mut())
            {
                if model.api_key.is_some() {
                    model.api_key = Some("***".into());
                }
            }
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        Commands::Assess { task } => {
            let task = task_text(task)?;
            let conductor = Conductor::new(cadre_llm::create_caller(&config)?, config.engine_config());
            let assessment = conductor.assess_delegation_need(&task, &config.tools).await?;
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }
        Commands::Design { task } => {
            let task = task_text(task)?;
            let conductor = Conductor::new(cadre_llm::create_caller(&config)?, config.engine_config());
            let design = conductor
                .design_solution(&task, &config.tools, &ModelOverrides::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&design)?);
        }
        Commands::Run {
            task,
            target_score,
            max_iterations,
            tools,
            json,
        } => {
            let task = task_text(task)?;
            let engine = config.engine_config();

            let mut all_tools = config.tools.clone();
            all_tools.extend(tools.into_iter().map(|name| ToolDescriptor::new(name, "")));

            let mut request = CycleRequest::new(task, &engine).with_tools(all_tools);
            if let Some(score) = target_score {
                anyhow::ensure!(
                    (0.0..=1.0).contains(&score),
                    "--target-score must be within 0.0..=1.0"
                );
                request.target_score = score;
            }
            if let Some(n) = max_iterations {
                request.max_iterations = n;
            }

            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                warn!("Interrupted, finishing current step...");
                cancel_clone.cancel();
            });

            let conductor = Conductor::new(cadre_llm::create_caller(&config)?, engine)
                .with_cancellation(cancel);
            let progress = tokio::spawn(print_progress(conductor.events().subscribe()));

            let result = conductor.run_cycle(request).await;
            progress.abort();

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_summary(&result);
            }
            if !result.succeeded() {
                std::process::exit(2);
            }
        }
        Commands::Validate { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Join trailing arguments, falling back to stdin.
fn task_text(words: Vec<String>) -> anyhow::Result<String> {
    let text = words.join(" ");
    if !text.trim().is_empty() {
        return Ok(text);
    }
    let input = io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n");
    anyhow::ensure!(!input.trim().is_empty(), "no task given");
    Ok(input)
}

fn validate_file(path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let graph: WorkflowGraph = serde_json::from_str(&raw)?;
    let report = validate(&graph).map_err(|v| anyhow::anyhow!("invalid graph: {}", v))?;
    let tiers = schedule(&graph)?;

    println!("{} agents, terminal {}", graph.len(), report.terminal);
    for (i, tier) in tiers.tiers.iter().enumerate() {
        println!("  tier {}: {}", i, tier.join(", "));
    }
    if !report.side_effect_leaves.is_empty() {
        println!("  side-effect leaves: {}", report.side_effect_leaves.join(", "));
    }
    Ok(())
}

async fn print_progress(mut rx: tokio::sync::broadcast::Receiver<CycleEvent>) {
    loop {
        match rx.recv().await {
            Ok(CycleEvent::IterationStarted { iteration }) => {
                eprintln!("\x1b[1m== iteration {}\x1b[0m", iteration + 1);
            }
            Ok(CycleEvent::TierStarted { tier, agents }) => {
                eprintln!("  tier {}: {}", tier, agents.join(", "));
            }
            Ok(CycleEvent::AgentFinished { agent_id, status }) => {
                eprintln!("    {} {}", agent_id, status.as_str());
            }
            Ok(CycleEvent::Evaluated { score, blocking, .. }) => {
                if blocking.is_empty() {
                    eprintln!("  score {:.2}", score);
                } else {
                    eprintln!("  score {:.2} (blocking: {})", score, blocking.join(", "));
                }
            }
            Ok(CycleEvent::RevisionRequested { .. }) => eprintln!("  revising..."),
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "Progress output lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(result: &CycleResult) {
    println!();
    println!("State: {} ({:?})", result.state, result.termination);
    println!("Iterations: {}", result.iterations.len());
    for it in &result.iterations {
        match (it.score(), &it.failure) {
            (Some(score), _) => println!("  #{} score {:.2}", it.index + 1, score),
            (None, Some(failure)) => println!("  #{} failed: {}", it.index + 1, failure),
            (None, None) => println!("  #{} not evaluated", it.index + 1),
        }
    }
    if let Some(best) = result.best_iteration() {
        println!("Best: iteration #{} ({})", best.index + 1, best.graph.name);
        if let Some(output) = best.trace.as_ref().and_then(|t| t.output.as_ref()) {
            match serde_json::to_string_pretty(output) {
                Ok(text) => println!("{}", text),
                Err(e) => warn!(error = %e, "Could not render output"),
            }
        }
    }
}
