use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use patchbench::config::Config;
use patchbench::patch::payload_to_patch;
use patchbench::results::ResultStore;
use patchbench::sidecar::{Evaluator, LocalCheckout, SignalDir};
use patchbench::task::{JsonlTaskLoader, Task, TaskLoader};
use patchbench::verify::verify_task;
use patchbench::workspace::WorkingCopy;
use patchbench::{grade, logger, ScriptedAgent};

#[derive(Parser)]
#[command(
    name = "patchbench",
    version,
    about = "Agentic patch generation with sidecar test verification for bug-fix benchmarks."
)]
struct Cli {
    /// Config file (default: <config_dir>/patchbench/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Turn a model-output payload into a unified diff
    Extract {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        edits: PathBuf,
    },

    /// Grade raw test-runner output against a task
    Classify {
        #[command(flatten)]
        task: TaskArgs,
        #[arg(long)]
        output: PathBuf,
    },

    /// Serve evaluation requests against a local git checkout
    Evaluate {
        #[command(flatten)]
        task: TaskArgs,
        #[arg(long)]
        checkout: PathBuf,
        #[arg(long)]
        sidecar_dir: Option<PathBuf>,
    },

    /// Run the verification loop with a scripted agent
    Run {
        #[command(flatten)]
        task: TaskArgs,
        #[arg(long)]
        repo: PathBuf,
        #[arg(long)]
        script: PathBuf,
        #[arg(long)]
        sidecar_dir: Option<PathBuf>,
        #[arg(long)]
        budget: Option<u32>,
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Show the latest result per task and the pass rate
    Results {
        #[arg(long)]
        store: PathBuf,
    },
}

#[derive(Args)]
struct TaskArgs {
    /// Single task record as JSON
    #[arg(long, conflicts_with = "dataset")]
    task: Option<PathBuf>,

    /// Directory holding <split>.jsonl files
    #[arg(long, requires = "instance")]
    dataset: Option<PathBuf>,

    #[arg(long, default_value = "test")]
    split: String,

    #[arg(long)]
    instance: Option<String>,
}

impl TaskArgs {
    fn load(&self) -> Result<Task> {
        match (&self.task, &self.dataset, &self.instance) {
            (Some(path), _, _) => {
                Task::from_file(path).with_context(|| format!("loading task {}", path.display()))
            }
            (None, Some(dir), Some(id)) => JsonlTaskLoader::new(dir)
                .load(id, &self.split)
                .with_context(|| format!("loading {id} from split {}", self.split)),
            _ => bail!("pass --task <file> or --dataset <dir> --instance <id>"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    logger::init(&config.log).context("initialising logger")?;

    match cli.command {
        CliCommand::Extract { root, edits } => extract(&config, &root, &edits),
        CliCommand::Classify { task, output } => classify(&task, &output),
        CliCommand::Evaluate {
            task,
            checkout,
            sidecar_dir,
        } => evaluate(&config, &task, &checkout, sidecar_dir),
        CliCommand::Run {
            task,
            repo,
            script,
            sidecar_dir,
            budget,
            results,
        } => run(&config, &task, &repo, &script, sidecar_dir, budget, results),
        CliCommand::Results { store } => show_results(&store),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn extract(config: &Config, root: &Path, edits: &Path) -> Result<()> {
    let raw = fs::read_to_string(edits).with_context(|| format!("reading {}", edits.display()))?;
    let wc = WorkingCopy::open(root).with_context(|| format!("opening {}", root.display()))?;

    let patch = payload_to_patch(&wc, &raw, config.patch.fuzzy_threshold);
    info!(sha256 = %patch.sha256, empty = patch.is_empty(), "patch extracted");
    print!("{}", patch.text);
    Ok(())
}

fn classify(task: &TaskArgs, output: &Path) -> Result<()> {
    let task = task.load()?;
    let raw = fs::read_to_string(output).with_context(|| format!("reading {}", output.display()))?;
    print_json(&grade(&raw, &task))
}

fn evaluate(config: &Config, task: &TaskArgs, checkout: &Path, sidecar_dir: Option<PathBuf>) -> Result<()> {
    let task = task.load()?;
    let dir = SignalDir::create(sidecar_dir.unwrap_or_else(|| config.sidecar.dir.clone()))?;
    let env = LocalCheckout::open(checkout).with_context(|| format!("opening {}", checkout.display()))?;

    let mut evaluator = Evaluator::new(env, task, config.evaluator_settings());
    let handled = evaluator.serve(&dir)?;
    print_json(&json!({ "requests_handled": handled }))
}

fn run(
    config: &Config,
    task: &TaskArgs,
    repo: &Path,
    script: &Path,
    sidecar_dir: Option<PathBuf>,
    budget: Option<u32>,
    results: Option<PathBuf>,
) -> Result<()> {
    let task = task.load()?;
    let mut agent = ScriptedAgent::from_file(script)?;
    let sidecar_dir = sidecar_dir.unwrap_or_else(|| config.sidecar.dir.clone());
    let store = results.map(ResultStore::new);

    let mut settings = config.verify_settings();
    if let Some(b) = budget {
        settings.budget = b;
    }

    let outcome = verify_task(config, &settings, &task, repo, &sidecar_dir, &mut agent, store.as_ref())
        .with_context(|| format!("verifying {}", task.instance_id))?;

    print_json(&outcome)
}

fn show_results(store: &Path) -> Result<()> {
    let store = ResultStore::new(store);
    let records = store.load()?;
    let summary = store.summary()?;
    print_json(&json!({
        "summary": summary,
        "records": records.values().collect::<Vec<_>>(),
    }))
}
