use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use lumen_git::SystemGit;
use lumenflow::config::{LumenConfig, CONFIG_FILE};
use lumenflow::doctor::Doctor;
use lumenflow::error::LumenError;
use lumenflow::lifecycle::{BlockRequest, CreateRequest, EditRequest, Engine, UnblockRequest};
use lumenflow::model::{ClaimMode, Exposure, Lane, Priority, WuId, WuType};
use lumenflow::spec_store::WriteMode;
use lumenflow::telemetry;

/// Work-unit lifecycle engine
///
/// wu coordinates many human and AI agents working one repository through
/// Work Units: per-WU YAML specs under tasks/wu/, an append-only event log,
/// and lane-exclusive claims. Every write to the shared branch goes through
/// an isolated micro-worktree, so your checkout never switches branches and
/// concurrent agents never trample each other.
///
/// QUICK START:
///
///   wu create --lane "Ops: Tooling" --title "..." --description "..." \
///       --acceptance "..."
///   wu claim WU-100
///   # work in the printed worktree, then:
///   wu complete WU-100
///
/// Exit codes: 0 success, 1 validation/precondition failure,
/// 2 infrastructure failure after retries.
#[derive(Parser)]
#[command(name = "wu")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'wu <command> --help' for more information on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new work unit as `ready`
    Create(CreateArgs),

    /// Edit a spec without changing its id or status
    Edit(EditArgs),

    /// Claim a ready work unit onto its lane
    Claim(ClaimArgs),

    /// Release a claim back to `ready` without completing
    Release(ReleaseArgs),

    /// Mark a claimed work unit blocked (it keeps its lane slot)
    Block(BlockArgs),

    /// Unblock back to `in_progress`
    Unblock(UnblockArgs),

    /// Land the lane branch and close the work unit
    Complete(CompleteArgs),

    /// Remove a work unit entirely (no event is written)
    Delete(DeleteArgs),

    /// Detect and repair drift between log, YAML, projections, and git
    Repair(RepairArgs),

    /// Sweep leftover tmp/ branches and orphaned claim worktrees
    Prune(PruneArgs),

    /// Create a delegated child work unit under a parent
    Spawn(SpawnArgs),

    /// Summarize work units and lane locks
    Status,

    /// Drive a throwaway WU through the full state machine, verifying
    /// invariants after every step
    LifecycleHarness,
}

// ---------------------------------------------------------------------------
// Per-verb args
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
struct CreateArgs {
    /// Explicit ID (WU-<n>); omitted means next sequential
    #[arg(long)]
    id: Option<String>,

    /// Lane, e.g. "Ops: Tooling"
    #[arg(long)]
    lane: String,

    /// Short imperative title
    #[arg(long)]
    title: String,

    /// feature | bug | refactor | tooling | documentation | process
    #[arg(long = "type", default_value = "tooling")]
    wu_type: String,

    /// P0 | P1 | P2 | P3
    #[arg(long, default_value = "P2")]
    priority: String,

    /// ui | api | backend-only | documentation
    #[arg(long, default_value = "backend-only")]
    exposure: String,

    /// What and why
    #[arg(long)]
    description: String,

    /// Acceptance criterion (repeatable)
    #[arg(long = "acceptance")]
    acceptance: Vec<String>,

    /// Repo-relative glob the work may touch (repeatable)
    #[arg(long = "code-path")]
    code_paths: Vec<String>,

    /// Spec reference (repeatable)
    #[arg(long = "spec-ref")]
    spec_refs: Vec<String>,

    /// Owning initiative
    #[arg(long)]
    initiative: Option<String>,

    /// Initiative phase (1-based)
    #[arg(long)]
    phase: Option<u32>,

    /// Also require every referenced path to exist on disk
    #[arg(long)]
    check_reality: bool,
}

#[derive(Args, Debug)]
struct EditArgs {
    /// The work unit (WU-<n>)
    wu: String,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    description: Option<String>,

    /// P0 | P1 | P2 | P3
    #[arg(long)]
    priority: Option<String>,

    /// ui | api | backend-only | documentation
    #[arg(long)]
    exposure: Option<String>,

    #[arg(long)]
    notes: Option<String>,

    /// Move to this initiative (updates both membership lists)
    #[arg(long, conflicts_with = "clear_initiative")]
    initiative: Option<String>,

    /// Leave the current initiative
    #[arg(long)]
    clear_initiative: bool,

    #[arg(long)]
    phase: Option<u32>,

    /// Acceptance criterion to append (repeatable)
    #[arg(long = "add-acceptance")]
    add_acceptance: Vec<String>,

    /// Code path to append (repeatable)
    #[arg(long = "add-code-path")]
    add_code_paths: Vec<String>,

    /// Spec reference to append (repeatable)
    #[arg(long = "add-spec-ref")]
    add_spec_refs: Vec<String>,
}

#[derive(Args, Debug)]
struct ClaimArgs {
    /// The work unit (WU-<n>)
    wu: String,

    /// worktree | branch-pr
    #[arg(long, default_value = "worktree")]
    mode: String,
}

#[derive(Args, Debug)]
struct ReleaseArgs {
    /// The work unit (WU-<n>)
    wu: String,

    /// Why the claim is being given up
    #[arg(long, default_value = "released")]
    reason: String,
}

#[derive(Args, Debug)]
struct BlockArgs {
    /// The work unit (WU-<n>)
    wu: String,

    /// What it is waiting on
    #[arg(long)]
    reason: String,
}

#[derive(Args, Debug)]
struct UnblockArgs {
    /// The work unit (WU-<n>)
    wu: String,
}

#[derive(Args, Debug)]
struct CompleteArgs {
    /// The work unit (WU-<n>)
    wu: String,
}

#[derive(Args, Debug)]
struct DeleteArgs {
    /// The work unit (WU-<n>)
    wu: String,

    /// Required to delete a claimed (in_progress/blocked) work unit
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct RepairArgs {
    /// Report what would change without touching anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct PruneArgs {
    /// Actually delete (default is a preview)
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct SpawnArgs {
    /// The delegating parent (WU-<n>)
    #[arg(long)]
    parent: String,

    #[command(flatten)]
    create: CreateArgs,
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    telemetry::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(2))
        }
    }
}

fn run(cli: Cli) -> Result<(), LumenError> {
    let root = find_repo_root()?;
    let config = LumenConfig::load(&root.join(CONFIG_FILE))?;
    let engine = Engine::new(&root, config, SystemGit::new());

    match cli.command {
        Commands::Create(args) => {
            let id = engine.create(&create_request(&args)?)?;
            println!("Created {id} ({})", args.lane);
            println!("Claim it: wu claim {id}");
        }
        Commands::Edit(args) => {
            let id = parse_wu(&args.wu)?;
            let req = EditRequest {
                title: args.title,
                description: args.description,
                priority: args.priority.as_deref().map(parse_priority).transpose()?,
                exposure: args.exposure.as_deref().map(parse_exposure).transpose()?,
                notes: args.notes,
                initiative: if args.clear_initiative {
                    Some(None)
                } else {
                    args.initiative.map(Some)
                },
                phase: args.phase,
                add_acceptance: args.add_acceptance,
                add_code_paths: args.add_code_paths,
                add_spec_refs: args.add_spec_refs,
            };
            engine.edit(id, &req)?;
            println!("Edited {id}");
        }
        Commands::Claim(args) => {
            let id = parse_wu(&args.wu)?;
            let outcome = engine.claim(id, parse_mode(&args.mode)?)?;
            println!("Claimed {id} on branch {}", outcome.branch);
            if let Some(wt) = outcome.worktree {
                println!();
                println!("  Worktree: {}/", wt.display());
                println!();
                println!("  All edits for {id} happen under that path.");
                println!("  When the work passes its gates: wu complete {id}");
            }
        }
        Commands::Release(args) => {
            let id = parse_wu(&args.wu)?;
            engine.release(id, &args.reason)?;
            println!("Released {id} (lane is free again)");
        }
        Commands::Block(args) => {
            let id = parse_wu(&args.wu)?;
            engine.block(&BlockRequest {
                id,
                reason: args.reason,
            })?;
            println!("Blocked {id} (it still holds its lane)");
        }
        Commands::Unblock(args) => {
            let id = parse_wu(&args.wu)?;
            engine.unblock(&UnblockRequest { id })?;
            println!("Unblocked {id}");
        }
        Commands::Complete(args) => {
            let id = parse_wu(&args.wu)?;
            engine.complete(id)?;
            println!("Completed {id}");
        }
        Commands::Delete(args) => {
            let id = parse_wu(&args.wu)?;
            engine.delete(id, args.force)?;
            println!("Deleted {id}");
        }
        Commands::Repair(args) => {
            let log_report = engine.events().repair(args.dry_run)?;
            if !log_report.is_clean() {
                println!(
                    "event log: {} line(s) {}",
                    log_report.removed.len(),
                    if args.dry_run { "would be dropped" } else { "dropped" }
                );
                for line in &log_report.removed {
                    println!("  line {}: {} ({})", line.line_no, line.reason, line.content);
                }
                if let Some(backup) = &log_report.backup {
                    println!("  original saved to {}", backup.display());
                }
            }
            let report = Doctor::new(&engine).run(args.dry_run)?;
            if report.is_clean() && log_report.is_clean() {
                println!("No drift detected.");
            } else {
                for finding in &report.findings {
                    println!("{finding}");
                }
                if args.dry_run {
                    println!("(dry run; re-run without --dry-run to repair)");
                } else {
                    println!("repaired {} finding(s)", report.repaired);
                }
            }
        }
        Commands::Prune(args) => {
            let report = engine.prune(args.force)?;
            if report.total() == 0 {
                println!("Nothing to prune.");
            } else {
                for branch in &report.tmp_branches {
                    println!(
                        "  {} tmp branch {branch}",
                        if report.forced { "deleted" } else { "would delete" }
                    );
                }
                for wt in &report.orphan_worktrees {
                    println!(
                        "  {} orphan worktree {}",
                        if report.forced { "removed" } else { "would remove" },
                        wt.display()
                    );
                }
                if !report.forced {
                    println!("Run with --force to apply.");
                }
            }
        }
        Commands::Spawn(args) => {
            let parent = parse_wu(&args.parent)?;
            let (child, spawn_id) = engine.spawn(parent, &create_request(&args.create)?)?;
            println!("Spawned {child} under {parent} ({spawn_id})");
        }
        Commands::Status => {
            print!("{}", engine.status_report()?);
        }
        Commands::LifecycleHarness => {
            let report = engine.lifecycle_harness()?;
            for step in &report.steps {
                println!("{step}");
            }
            println!("lifecycle harness passed");
        }
    }
    Ok(())
}

fn create_request(args: &CreateArgs) -> Result<CreateRequest, LumenError> {
    Ok(CreateRequest {
        id: args.id.as_deref().map(parse_wu).transpose()?,
        lane: Lane::new(&args.lane)?,
        title: args.title.clone(),
        wu_type: parse_type(&args.wu_type)?,
        priority: parse_priority(&args.priority)?,
        exposure: parse_exposure(&args.exposure)?,
        description: args.description.clone(),
        acceptance: args.acceptance.clone(),
        code_paths: args.code_paths.clone(),
        spec_refs: args.spec_refs.clone(),
        initiative: args.initiative.clone(),
        phase: args.phase,
        sizing: None,
        mode: if args.check_reality {
            WriteMode::StrictReality
        } else {
            WriteMode::Strict
        },
    })
}

// ---------------------------------------------------------------------------
// Argument parsing helpers
// ---------------------------------------------------------------------------

fn parse_wu(s: &str) -> Result<WuId, LumenError> {
    WuId::new(s).map_err(LumenError::InvalidValue)
}

fn parse_mode(s: &str) -> Result<ClaimMode, LumenError> {
    match s {
        "worktree" => Ok(ClaimMode::Worktree),
        "branch-pr" => Ok(ClaimMode::BranchPr),
        other => Err(bad_flag("mode", other, "worktree | branch-pr")),
    }
}

fn parse_type(s: &str) -> Result<WuType, LumenError> {
    match s {
        "feature" => Ok(WuType::Feature),
        "bug" => Ok(WuType::Bug),
        "refactor" => Ok(WuType::Refactor),
        "tooling" => Ok(WuType::Tooling),
        "documentation" => Ok(WuType::Documentation),
        "process" => Ok(WuType::Process),
        other => Err(bad_flag(
            "type",
            other,
            "feature | bug | refactor | tooling | documentation | process",
        )),
    }
}

fn parse_priority(s: &str) -> Result<Priority, LumenError> {
    match s {
        "P0" => Ok(Priority::P0),
        "P1" => Ok(Priority::P1),
        "P2" => Ok(Priority::P2),
        "P3" => Ok(Priority::P3),
        other => Err(bad_flag("priority", other, "P0 | P1 | P2 | P3")),
    }
}

fn parse_exposure(s: &str) -> Result<Exposure, LumenError> {
    match s {
        "ui" => Ok(Exposure::Ui),
        "api" => Ok(Exposure::Api),
        "backend-only" => Ok(Exposure::BackendOnly),
        "documentation" => Ok(Exposure::Documentation),
        other => Err(bad_flag(
            "exposure",
            other,
            "ui | api | backend-only | documentation",
        )),
    }
}

fn bad_flag(flag: &str, value: &str, allowed: &str) -> LumenError {
    LumenError::SpecValidation {
        wu_id: None,
        problems: vec![format!("--{flag} '{value}' is not one of: {allowed}")],
    }
}

/// Walk up from the current directory to the enclosing git checkout.
fn find_repo_root() -> Result<PathBuf, LumenError> {
    let cwd = std::env::current_dir()?;
    let mut dir = cwd.as_path();
    loop {
        if dir.join(".git").exists() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => {
                return Err(LumenError::Config {
                    path: cwd,
                    detail: "not inside a git repository (no .git found walking up)".to_owned(),
                });
            }
        }
    }
}
