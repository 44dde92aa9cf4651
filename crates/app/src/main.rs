use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use clap::{Parser, Subcommand};
use mascot_ar_core::{
    load_config, run_scenario, save_config, CollectionLedger, EngineConfig, PlacementEngine,
    RecognitionWorker, Scenario, ScenarioReport, ScriptedRecognizer, ScriptedSession,
};
use tracing_subscriber::EnvFilter;

fn main() -> mascot_ar_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            config,
            json,
        } => {
            let text = std::fs::read_to_string(&scenario)?;
            let scenario = Scenario::from_json(&text)?;
            let report = run_scenario(scenario, engine_config(config.as_deref())?)?;
            print_report(&report, json)
        }
        Commands::Demo { floating, json } => {
            let scenario = if floating {
                Scenario::floating_demo()
            } else {
                Scenario::surface_demo()
            };
            let report = run_scenario(scenario, EngineConfig::default())?;
            print_report(&report, json)
        }
        Commands::Live { scenario, config } => {
            let scenario = match scenario {
                Some(path) => Scenario::from_json(&std::fs::read_to_string(path)?)?,
                None => Scenario::surface_demo(),
            };
            run_live(scenario, engine_config(config.as_deref())?)
        }
        Commands::InitConfig { path } => {
            save_config(&EngineConfig::default(), &path)?;
            tracing::info!(?path, "wrote default configuration");
            Ok(())
        }
    }
}

fn engine_config(path: Option<&Path>) -> mascot_ar_core::Result<EngineConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            load_config(path)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Plays the scenario at frame pace with recognition on a worker thread.
fn run_live(scenario: Scenario, config: EngineConfig) -> mascot_ar_core::Result<()> {
    tracing::info!(scenario = %scenario.name, "starting live replay");

    let recognizer = ScriptedRecognizer::new(
        scenario
            .recognition
            .iter()
            .map(|step| step.response.clone()),
    );
    let worker = RecognitionWorker::spawn(recognizer)?;
    let ledger = Arc::new(CollectionLedger::new());
    let mut engine = PlacementEngine::new(config, worker, ledger, || {
        tracing::info!("navigating to collection screen");
    })?;
    let status = engine.status();

    let interval = scenario.frame_interval();
    let tap_ticks = scenario.tap_ticks.clone();
    let mut session = ScriptedSession::new(scenario);
    let started = Instant::now();
    let mut last_message = String::new();

    loop {
        let report = engine.tick(&mut session);
        if report.frame.is_none() {
            break;
        }

        if let Some(tick) = session.current_tick() {
            if tap_ticks.contains(&tick) {
                if let Some(node) = engine.placed().map(|record| record.node) {
                    engine.tap(node);
                }
            }
        }

        let message = status.message();
        if message != last_message {
            println!("[{:>6} ms] {message}", started.elapsed().as_millis());
            last_message = message;
        }

        std::thread::sleep(interval);
    }

    let stats = engine.teardown(&mut session);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn print_report(report: &ScenarioReport, json: bool) -> mascot_ar_core::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("scenario: {} ({} ticks)", report.name, report.ticks);
    println!("attempts started at (ms): {:?}", report.attempt_starts_ms);
    match &report.placement {
        Some(placement) => println!(
            "placed {:?} at {:?} after {} ms",
            placement.kind, placement.position, placement.placed_at_ms
        ),
        None => println!("not placed"),
    }
    println!("status: {}", report.status.message);
    println!(
        "collected: {}  navigations: {}  buffers outstanding: {}",
        report.collected, report.navigations, report.buffers.outstanding
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Marker-triggered AR mascot placement", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a scenario file and print what happened.
    Run {
        /// Scenario description in JSON.
        scenario: PathBuf,
        /// Engine configuration in TOML.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Replay a built-in scenario.
    Demo {
        /// Use the scene without any detected surface.
        #[arg(long)]
        floating: bool,
        #[arg(long)]
        json: bool,
    },
    /// Play a scenario in real time with recognition on a worker thread.
    Live {
        /// Scenario description in JSON; defaults to the surface demo.
        scenario: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write the default configuration to a TOML file.
    InitConfig {
        /// Output path for the configuration.
        path: PathBuf,
    },
}
