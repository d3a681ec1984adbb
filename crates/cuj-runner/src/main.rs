//! cujrun - user-journey scenario runner
//!
//! Runs one tiered scenario against the simulated back-end, or prints the
//! step plan for a tier and room.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Parser, Subcommand};
use cuj_core::config::parse_override;
use cuj_core::{window_duration, RoomSize, ScenarioKind, ScenarioVars, StepPlan, Tier};
use cuj_runner::sim::{no_room_prepare, SimBackend, SimScript};
use cuj_runner::{run_with_room_urls, Context, ScenarioParams, ScenarioReport};
use eyre::WrapErr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "cujrun", about = "Tiered user-journey scenario runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scenario against the simulated back-end
    Run {
        #[command(flatten)]
        target: Target,

        /// Directory for charts, histograms, events and diagnostics
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Scenario variables file (key=value lines)
        #[arg(long, env = "CUJ_VARS")]
        vars: Option<PathBuf>,

        /// Override one scenario variable (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        overrides: Vec<(String, String)>,

        /// Overall deadline in seconds
        #[arg(long, default_value = "900")]
        timeout: u64,

        /// Force tablet mode
        #[arg(long, conflicts_with = "clamshell")]
        tablet: bool,

        /// Force clamshell mode
        #[arg(long)]
        clamshell: bool,

        /// Participant counts the simulated room reports, in poll order
        #[arg(long, value_delimiter = ',')]
        participants: Vec<u32>,
    },

    /// Print the step plan and window length
    Plan {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(clap::Args)]
struct Target {
    /// Scenario kind: conference, video, tab-switch or multitasking
    #[arg(long, default_value = "conference", value_parser = parse_kind)]
    kind: ScenarioKind,

    /// Tier: basic, plus, premium or record
    #[arg(long, default_value = "basic", value_parser = parse_tier)]
    tier: Tier,

    /// Room size: none, two, small, large or class
    #[arg(long, default_value = "small", value_parser = parse_room)]
    room: RoomSize,
}

fn parse_kind(s: &str) -> Result<ScenarioKind, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_tier(s: &str) -> Result<Tier, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_room(s: &str) -> Result<RoomSize, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    parse_override(s).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    let result = runtime.block_on(async {
        match cli.command {
            Command::Plan { target } => {
                print_plan(&target);
                Ok(())
            }
            Command::Run {
                target,
                out_dir,
                vars,
                overrides,
                timeout,
                tablet,
                clamshell,
                participants,
            } => {
                let tablet_mode = match (tablet, clamshell) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                let options = RunOptions {
                    out_dir,
                    vars,
                    overrides,
                    timeout: Duration::from_secs(timeout),
                    tablet_mode,
                    participants,
                };
                run_scenario(&target, options).await
            }
        }
    });

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn print_plan(target: &Target) {
    let steps = StepPlan::for_kind(target.kind).steps_for(target.tier, target.room);
    let window = window_duration(target.tier, target.room);
    println!(
        "{} / {} / {}: {}s window",
        target.kind.as_str(),
        target.tier.as_str(),
        target.room.as_str(),
        window.as_secs()
    );
    if steps.is_empty() {
        println!("  (no steps)");
    }
    for (i, step) in steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step.as_str());
    }
}

struct RunOptions {
    out_dir: Option<PathBuf>,
    vars: Option<PathBuf>,
    overrides: Vec<(String, String)>,
    timeout: Duration,
    tablet_mode: Option<bool>,
    participants: Vec<u32>,
}

async fn run_scenario(target: &Target, options: RunOptions) -> eyre::Result<()> {
    let mut vars = match &options.vars {
        Some(path) => ScenarioVars::from_file(path)
            .wrap_err_with(|| format!("failed to read vars file {}", path.display()))?,
        None => ScenarioVars::default(),
    };
    for (key, value) in &options.overrides {
        vars.apply_value(key, value)
            .wrap_err_with(|| format!("invalid override {key}"))?;
    }

    let out_dir = options.out_dir.unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        PathBuf::from("out").join(format!("{}-{stamp}", target.kind.as_str()))
    });
    let mut params = ScenarioParams::new(target.kind, target.tier, target.room, &out_dir);
    if let Some(tablet) = options.tablet_mode {
        params = params.with_tablet_mode(tablet);
    }

    let (root, release) = Context::background().with_timeout(options.timeout);
    let ctx = root.with_annotations(vars.to_annotations());
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT, cancelling scenario");
                release.cancel();
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGINT");
                // Dropping the releaser would cancel the scenario.
                std::future::pending::<()>().await;
                drop(release);
            }
        }
    });

    let script = SimScript {
        participants: options.participants,
        ..SimScript::default()
    };
    let (kind, room) = (target.kind, target.room);

    let result = if kind == ScenarioKind::Conference && room.has_room() {
        let config = vars
            .meet_config(room, &mut rand::thread_rng())
            .wrap_err("failed to resolve conference rooms")?;
        run_with_room_urls(&ctx, &config, |ctx, url| {
            // Each attempt gets a fresh back-end, as a new session would.
            let backend = SimBackend::from_script(script.clone());
            let params = params.clone();
            async move {
                let mut workload = backend.workload(kind, room);
                cuj_runner::run(&ctx, backend.session(), &mut workload, backend.prepare(url), &params).await
            }
        })
        .await
    } else {
        let backend = SimBackend::from_script(script);
        let mut workload = backend.workload(kind, room);
        cuj_runner::run(&ctx, backend.session(), &mut workload, no_room_prepare(), &params).await
    };
    let report = result.wrap_err_with(|| format!("{} scenario failed", kind.as_str()))?;

    print_report(&report, &out_dir);
    Ok(())
}

fn print_report(report: &ScenarioReport, out_dir: &std::path::Path) {
    println!("scenario {}", report.scenario_id);
    println!("window: {}s", report.window.as_secs());
    for outcome in &report.steps {
        println!(
            "  {:<18} {:<9} {:>6}ms",
            outcome.step.as_str(),
            outcome.status.as_str(),
            outcome.duration.as_millis()
        );
    }
    for name in report.bag.names() {
        let values = report.bag.get(name).unwrap_or_default();
        let unit = report.bag.unit(name).unwrap_or("");
        println!("  {name} = {values:?} {unit}");
    }
    println!("results in {}", out_dir.display());
}
