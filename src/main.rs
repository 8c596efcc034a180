use clap::Parser;

use bagpipe::batch::BatchRunner;
use bagpipe::cli::{BatchArgs, Cli, Command, RunArgs, ShutdownController};
use bagpipe::dataset::{Dataset, DatasetFilter};
use bagpipe::engine::PipelineEngine;
use bagpipe::error::BpResult;
use bagpipe::session::Session;
use bagpipe::stages::{default_registry, default_stage_plan};

fn main() {
    bagpipe::logging::init();

    if let Err(e) = ShutdownController::install(None) {
        tracing::warn!("failed to install Ctrl+C handler: {e}");
    }

    match run() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            if ShutdownController::is_shutting_down() || error.is_interrupt() {
                eprintln!("interrupted");
                std::process::exit(ShutdownController::signal_exit_code());
            }
            eprintln!("error: {error}");
            std::process::exit(1);
        }
    }
}

fn run() -> BpResult<i32> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run_single(&args),
        Command::Batch(args) => run_batch(&args),
        Command::Stages => {
            let registry = default_registry()?;
            for name in registry.names() {
                println!("{name}");
            }
            Ok(0)
        }
    }
}

fn run_single(args: &RunArgs) -> BpResult<i32> {
    let session = Session::open(&args.session, &args.data_root)?;
    if !session.has_raw_data() {
        eprintln!("session has no raw data: {}", session.id());
        eprintln!("expected structure: env_robot/session_name/raw/*");
        return Ok(1);
    }

    let registry = default_registry()?;
    let engine = PipelineEngine::new(&registry);

    let mut artifacts = Vec::new();
    for stage_name in default_stage_plan() {
        let outcome = engine.run(&session, &stage_name, &args.group, args.force)?;
        artifacts.extend(outcome.artifacts().to_vec());
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "session": session.id(),
                "artifacts": artifacts,
            }))?
        );
    } else {
        for artifact in &artifacts {
            println!("{}", artifact.display());
        }
    }
    tracing::info!(session = session.id(), "processing complete");
    Ok(0)
}

fn run_batch(args: &BatchArgs) -> BpResult<i32> {
    let dataset = Dataset::discover(&args.data_root)?;
    let filter = DatasetFilter {
        robot: args.robot.clone(),
        env: args.env.clone(),
        date: args.date.clone(),
        name: args.dataset.clone(),
    };
    let sessions = dataset.filter(&filter);

    if sessions.is_empty() {
        tracing::warn!("no sessions found");
        println!("no sessions found");
        return Ok(0);
    }

    tracing::info!(
        sessions = sessions.len(),
        force = args.force,
        "starting batch processing"
    );

    let registry = default_registry()?;
    let runner = BatchRunner::new(&registry);
    let report = runner.run_all(&sessions, &default_stage_plan(), &args.group, args.force)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("total:     {}", report.total);
        println!("succeeded: {}", report.succeeded);
        println!("failed:    {}", report.failed);
        if report.interrupted {
            println!("interrupted before completion");
        }
        for failure in &report.failures {
            println!(
                "  {} @ {}: {} [{}]",
                failure.session, failure.stage, failure.error, failure.code
            );
        }
    }

    Ok(report.exit_code())
}
