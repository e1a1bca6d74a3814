use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Mutex;

use pass_o_mat::config::Config;
use pass_o_mat::engine::Engine;
use pass_o_mat::predict::{parse_element_set, select_satellite, OrbitalState};
use pass_o_mat::report::{format_pass, DisplayZone};
use pass_o_mat::scheduler::{LogNotifier, Runner, RunnerSettings};
use pass_o_mat::web::run_server;

#[derive(Parser)]
#[command(name = "pass-o-mat")]
#[command(about = "Satellite pass prediction and reminders")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an element file
    Validate {
        file: String,
        /// Satellite to pick from a multi-record file
        #[arg(long)]
        name: Option<String>,
    },
    /// List upcoming passes
    Passes {
        #[arg(long)]
        config: String,
        /// Listing length in days, defaults to the configured lookahead
        #[arg(long)]
        days: Option<u32>,
    },
    /// Show the next pass
    Next {
        #[arg(long)]
        config: String,
    },
    /// Run the reminder loop and the HTTP API
    Run {
        #[arg(long)]
        config: String,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file, name } => validate(&file, name.as_deref()),
        Commands::Passes { config, days } => passes(&config, days),
        Commands::Next { config } => next(&config),
        Commands::Run { config } => run(&config),
    }
}

fn validate(path: &str, name: Option<&str>) -> ExitCode {
    let text = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error reading file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let parsed = match name {
        Some(name) => select_satellite(&text, name),
        None => parse_element_set(&text),
    };
    match parsed {
        Ok(state) => {
            println!("Element set is valid");
            println!("  Satellite:  {} ({:05})", state.display_name(), state.norad_id);
            println!("  Epoch:      {}", state.epoch);
            println!("  Age:        {:.1} days", state.days_since_epoch(Utc::now()));
            println!(
                "  Orbit:      inclination {:.4}°, eccentricity {:.7}",
                state.inclination_deg, state.eccentricity
            );
            println!("  Period:     {:.1} min", 1440.0 / state.mean_motion_rev_day);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid element set: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load(config_path: &str) -> Result<(Config, Engine), String> {
    let config = Config::from_file(config_path).map_err(|e| format!("Config error: {}", e))?;
    let mut engine = build_engine(&config).map_err(|e| format!("Config error: {}", e))?;
    let text = std::fs::read_to_string(&config.satellite.tle_file).map_err(|e| {
        format!(
            "Error reading {}: {}",
            config.satellite.tle_file.display(),
            e
        )
    })?;
    engine
        .refresh(&text, Utc::now())
        .map_err(|e| format!("Invalid element set: {}", e))?;
    Ok((config, engine))
}

fn build_engine(config: &Config) -> Result<Engine, pass_o_mat::ConfigError> {
    Ok(Engine::new(
        config.station()?,
        config.pass_search(),
        config.predict.shift_tolerance,
    )
    .with_satellite(config.satellite.name.clone())
    .with_lookahead(config.predict.lookahead))
}

fn print_header(state: &OrbitalState, zone: DisplayZone) {
    println!(
        "{} ({:05}), elements from {}",
        state.display_name(),
        state.norad_id,
        zone.format(state.epoch)
    );
}

fn passes(config_path: &str, days: Option<u32>) -> ExitCode {
    let (config, engine) = match load(config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let zone = config.display_zone();
    let window = days
        .map(|d| Duration::days(d.clamp(1, 14) as i64))
        .unwrap_or(config.predict.lookahead);

    let now = Utc::now();
    match engine.passes_within(now, window) {
        Ok(passes) => {
            if let Some(state) = engine.element_set() {
                print_header(&state, zone);
            }
            if passes.is_empty() {
                println!("No passes in the next {} day(s)", window.num_days());
            }
            for (i, pass) in passes.iter().enumerate() {
                println!("\nPass {}:\n{}", i + 1, format_pass(pass, zone));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Prediction failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn next(config_path: &str) -> ExitCode {
    let (config, engine) = match load(config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let zone = config.display_zone();

    match engine.compute_next_passes(Utc::now(), 1) {
        Ok(passes) => match passes.first() {
            Some(pass) => {
                if let Some(state) = engine.element_set() {
                    print_header(&state, zone);
                }
                println!("Next pass:\n{}", format_pass(pass, zone));
                ExitCode::SUCCESS
            }
            None => {
                println!("No pass in the next 14 days");
                ExitCode::SUCCESS
            }
        },
        Err(e) => {
            eprintln!("Prediction failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str) -> ExitCode {
    let config = match Config::from_file(config_path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Config error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let engine = match build_engine(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Config error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async move {
        let abort = engine.abort_flag();
        let engine = Arc::new(Mutex::new(engine));
        let settings = RunnerSettings::new(
            config.satellite.tle_file.clone(),
            config
                .predict
                .tick_interval
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(300)),
            config.subscribers(),
        );
        let notifier = Arc::new(LogNotifier::new(config.display_zone()));
        let mut runner = Runner::new(engine.clone(), abort, notifier, settings);
        if let Err(e) = runner.start() {
            return Err(e.to_string());
        }

        let outcome = tokio::select! {
            served = run_server(config.clone(), engine) => served.map_err(|e| e.to_string()),
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                Ok(())
            }
        };
        if let Err(e) = runner.stop().await {
            log::warn!("{}", e);
        }
        outcome
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
