//! c2rs - convergence engine for LLM-driven C to Rust migrations.
//!
//! ## Commands
//!
//! - `repair`: check the crate and drive it back to a passing build
//! - `evaluate`: plan library replacements over a `symbols.jsonl` table
//! - `verify`: analyze / optimize until the crate matches the C behaviour
//! - `status`: show run state, progress and configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use c2rs_core::config::load_run_state;
use c2rs_core::contract::{apply, write_mappings};
use c2rs_core::{
    BuildRunner, CheckpointStore, CommandOracle, ContractEvaluator, Denylist, GitCheckpointStore,
    LibraryPlanner, OracleAlignmentSteps, OracleArbiter, ProgressStore, ProjectConfig,
    ProjectLayout, RegressionGuard, RepairLoop, RepairOptions, RepairStats, ShellBuildExecutor,
    SymbolTable, VerificationLoop, METRICS,
};

const PRUNED_SYMBOLS_FILE: &str = "symbols_library_pruned.jsonl";
const MAPPINGS_FILE: &str = "library_replacements.jsonl";

#[derive(Parser)]
#[command(name = "c2rs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Convergence loops for LLM-driven C to Rust migration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project root holding the `.c2rs` control directory
    #[arg(long, global = true, env = "C2RS_PROJECT", default_value = ".")]
    project: PathBuf,

    /// Rust crate directory (default: the project root)
    #[arg(long, global = true, env = "C2RS_CRATE_DIR")]
    crate_dir: Option<PathBuf>,

    /// Build/test command run in the crate directory
    #[arg(long, global = true, env = "C2RS_BUILD_CMD", default_value = "cargo test -q")]
    build_cmd: String,

    /// Agent command; receives the prompt on stdin, answers on stdout
    #[arg(long, global = true, env = "C2RS_ORACLE_CMD")]
    oracle_cmd: Option<String>,

    /// Fix attempts per repair
    #[arg(long, global = true, default_value = "3")]
    max_retries: u32,

    /// Build checks allowed for the whole run (unlimited when omitted)
    #[arg(long, global = true)]
    max_checks: Option<u64>,

    /// Build timeout in seconds, 0 for none
    #[arg(long, global = true, default_value = "0")]
    build_timeout: u64,

    /// Model group forwarded to the agent
    #[arg(long, global = true, env = "C2RS_MODEL_GROUP")]
    model_group: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the crate once and repair it if the check fails
    Repair {
        /// Files the fix should focus on
        #[arg(long, num_args = 1..)]
        files: Vec<PathBuf>,
    },

    /// Decide which C subtrees can be replaced by existing crates
    Evaluate {
        /// Symbol table produced by the C analyzer
        #[arg(long)]
        symbols: PathBuf,

        /// Root symbols to start from (default: config `root_symbols`, then
        /// every uncalled function)
        #[arg(long, num_args = 1..)]
        roots: Vec<String>,

        /// Annotated symbol table (default: next to --symbols)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Replacement mapping file (default: next to --symbols)
        #[arg(long)]
        mappings: Option<PathBuf>,

        /// Directory the symbol `file` paths are relative to
        #[arg(long)]
        source_root: Option<PathBuf>,

        /// Cap on oracle evaluations
        #[arg(long)]
        max_functions: Option<usize>,
    },

    /// Verify C/Rust behavioural alignment
    Verify {
        #[arg(long, default_value = "10")]
        max_iterations: u32,

        /// C sources to compare against (default: the project root)
        #[arg(long)]
        source_root: Option<PathBuf>,
    },

    /// Show run state, progress and configuration
    Status,
}

/// Everything a command needs, resolved from flags and `.c2rs/config.json`.
struct Session {
    layout: ProjectLayout,
    config: ProjectConfig,
    options: RepairOptions,
    build_cmd: String,
    oracle_cmd: Option<String>,
}

impl Session {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let layout = ProjectLayout::new(&cli.project, cli.crate_dir.clone());
        let config = ProjectConfig::load_strict(&layout.config_path())
            .with_context(|| format!("Failed to load {}", layout.config_path().display()))?;
        let options = RepairOptions {
            max_retries: cli.max_retries,
            max_checks: cli.max_checks,
            build_timeout_secs: cli.build_timeout,
            non_interactive: true,
            model_group: cli.model_group.clone(),
        };
        Ok(Self {
            layout,
            config,
            options,
            build_cmd: cli.build_cmd.clone(),
            oracle_cmd: cli.oracle_cmd.clone(),
        })
    }

    fn oracle(&self) -> Result<Arc<CommandOracle>> {
        let Some(cmd) = self.oracle_cmd.as_deref() else {
            bail!("an agent command is required: pass --oracle-cmd or set C2RS_ORACLE_CMD");
        };
        Ok(Arc::new(CommandOracle::shell(cmd, &self.layout.crate_dir)))
    }

    fn store(&self) -> Arc<GitCheckpointStore> {
        Arc::new(GitCheckpointStore::new(&self.layout.crate_dir))
    }

    fn repair_loop(&self) -> Result<RepairLoop> {
        let oracle = self.oracle()?;
        let store: Arc<dyn CheckpointStore> = self.store();
        let arbiter = Arc::new(OracleArbiter::new(oracle.clone(), self.options.clone()));
        let guard = Arc::new(RegressionGuard::new(store.clone(), &self.layout.crate_dir).with_arbiter(arbiter));
        let build = BuildRunner::new(Arc::new(ShellBuildExecutor::shell(&self.build_cmd)), &self.options);

        Ok(RepairLoop::new(
            &self.layout.crate_dir,
            self.options.clone(),
            build,
            store,
            guard,
            oracle,
        )
        .with_progress(ProgressStore::new(self.layout.progress_path(), &self.layout.crate_dir))
        .with_audit_dir(self.layout.repairs_dir())
        .with_additional_notes(self.config.additional_notes.clone())
        .with_build_command(self.build_cmd.clone()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    c2rs_core::init_tracing(cli.json, level);

    let session = Session::from_cli(&cli)?;
    let result = match cli.command {
        Commands::Repair { files } => cmd_repair(&session, &files).await,
        Commands::Evaluate {
            symbols,
            roots,
            out,
            mappings,
            source_root,
            max_functions,
        } => {
            cmd_evaluate(
                &session,
                &symbols,
                roots,
                out,
                mappings,
                source_root,
                max_functions,
            )
            .await
        }
        Commands::Verify {
            max_iterations,
            source_root,
        } => cmd_verify(&session, max_iterations, source_root).await,
        Commands::Status => cmd_status(&session),
    };

    METRICS.flush();
    result
}

fn report_errors(stats: &RepairStats) {
    for error in stats.errors() {
        eprintln!("  - {error}");
    }
}

async fn cmd_repair(session: &Session, files: &[PathBuf]) -> Result<()> {
    let repair = session.repair_loop()?;
    let files: Vec<PathBuf> = files
        .iter()
        .map(|f| {
            if f.is_absolute() {
                f.clone()
            } else {
                session.layout.crate_dir.join(f)
            }
        })
        .collect();

    repair.store().snapshot();
    let mut stats = RepairStats::new();
    let passed = repair
        .verify_and_repair("repair", &files, &mut stats)
        .await
        .context("Repair aborted")?;

    println!("checks performed: {}", stats.checks_performed());
    if !passed {
        report_errors(&stats);
        bail!("crate still failing after repair");
    }
    println!("build passing");
    Ok(())
}

async fn cmd_evaluate(
    session: &Session,
    symbols: &Path,
    roots: Vec<String>,
    out: Option<PathBuf>,
    mappings: Option<PathBuf>,
    source_root: Option<PathBuf>,
    max_functions: Option<usize>,
) -> Result<()> {
    let mut table = SymbolTable::load_jsonl(symbols)
        .with_context(|| format!("Failed to read symbol table {}", symbols.display()))?;
    let roots = if roots.is_empty() {
        session.config.root_symbols.clone()
    } else {
        roots
    };

    let evaluator = ContractEvaluator::new(
        session.oracle()?,
        Denylist::new(&session.config.disabled_libraries),
    )
    .with_options(session.options.clone())
    .with_additional_notes(session.config.additional_notes.clone());
    let mut planner = LibraryPlanner::new(evaluator);
    if let Some(root) = source_root {
        planner = planner.with_source_root(root);
    }
    if let Some(max) = max_functions {
        planner = planner.with_max_functions(max);
    }

    let plan = planner.plan(&table, &roots).await.context("Library planning aborted")?;
    let records = apply(&plan, &mut table);

    let out = out.unwrap_or_else(|| symbols.with_file_name(PRUNED_SYMBOLS_FILE));
    let mappings = mappings.unwrap_or_else(|| symbols.with_file_name(MAPPINGS_FILE));
    table
        .write_jsonl(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    write_mappings(&mappings, &records)
        .with_context(|| format!("Failed to write {}", mappings.display()))?;

    info!(evaluated = plan.evaluated, selected = records.len(), "library plan written");
    println!("evaluated:  {}", plan.evaluated);
    println!("replaced:   {}", records.len());
    println!("pruned:     {}", plan.pruned.len());
    for record in &records {
        println!(
            "  {} -> {} ({:.2})",
            if record.qualified_name.is_empty() {
                &record.name
            } else {
                &record.qualified_name
            },
            record.libraries.join(", "),
            record.confidence
        );
    }
    println!("symbols:    {}", out.display());
    println!("mappings:   {}", mappings.display());
    Ok(())
}

async fn cmd_verify(session: &Session, max_iterations: u32, source_root: Option<PathBuf>) -> Result<()> {
    let state = load_run_state(&session.layout.run_state_path());
    let repair = Arc::new(session.repair_loop()?);
    let source_root = source_root.unwrap_or_else(|| session.layout.root.clone());
    let steps = Arc::new(OracleAlignmentSteps::new(repair, source_root));

    let mut stats = RepairStats::new();
    let report = VerificationLoop::new(steps)
        .with_max_iterations(max_iterations)
        .run(&state, &mut stats)
        .await
        .context("Verification did not run")?;

    println!("aligned:    {}", report.aligned);
    println!("iterations: {}", report.iterations);
    println!("summary:    {}", report.result.summary);
    if !report.aligned {
        report_errors(&stats);
        bail!("crate is not aligned after {} iterations", report.iterations);
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    project: String,
    crate_dir: String,
    run_state: c2rs_core::RunState,
    steps_completed: Vec<String>,
    fixes_recorded: usize,
    last_commit: Option<String>,
    config: ProjectConfig,
}

fn status_report(session: &Session) -> StatusReport {
    let progress = ProgressStore::new(session.layout.progress_path(), &session.layout.crate_dir).load();
    StatusReport {
        project: session.layout.root.display().to_string(),
        crate_dir: session.layout.crate_dir.display().to_string(),
        run_state: load_run_state(&session.layout.run_state_path()),
        steps_completed: progress.steps_completed.iter().cloned().collect(),
        fixes_recorded: progress.fix_count(),
        last_commit: progress.last_commit.clone(),
        config: session.config.clone(),
    }
}

fn cmd_status(session: &Session) -> Result<()> {
    let report = status_report(session);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
