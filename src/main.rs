// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use anyhow::Context;
use std::env;
use std::process::ExitCode;
use std::time::Instant;

use scenestack::config::{load_and_validate_config, RuntimeBuilder};
use scenestack::observability::init_logging;
use scenestack::workspace::CleanupRegistry;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <config.yaml|config.toml>", args[0]);
        eprintln!("Example: {} configs/mask.yaml", args[0]);
        return ExitCode::from(2);
    }

    match run(&args[1]).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run one configuration. `Ok(false)` means the run finished but some units failed.
async fn run(config_file: &str) -> anyhow::Result<bool> {
    let start_time = Instant::now();

    let config = load_and_validate_config(config_file)
        .with_context(|| format!("loading {}", config_file))?;
    let runtime = RuntimeBuilder::new(config).build();

    println!("Configuration: {}", config_file);
    println!("Pipeline: {}", runtime.pipeline().name());
    println!("Workers: {}", runtime.context().executor.workers);
    println!(
        "Failure strategy: {:?}",
        runtime.context().executor.failure_strategy
    );

    let cleanup = CleanupRegistry::new();
    let result = runtime.run(&cleanup).await;
    let removed = cleanup
        .drain()
        .await
        .context("removing intermediate artifacts")?;

    let summary = result.with_context(|| format!("{} pipeline", runtime.pipeline().name()))?;
    println!();
    print!("{}", summary);
    println!("Intermediate artifacts removed: {}", removed);
    println!("Total time: {:?}", start_time.elapsed());

    Ok(summary.is_success())
}
