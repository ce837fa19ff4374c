use clap::Parser;
use meshdb::config::{Args, NodeConfig};
use meshdb::Node;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match NodeConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("warning: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);

    let node = match Node::start(config).await {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("failed to start node: {e}");
            return ExitCode::FAILURE;
        }
    };

    wait_for_exit().await;
    node.shutdown();
    ExitCode::SUCCESS
}

fn init_logging(config: &NodeConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    match &config.log_location {
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => {
                let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(file).try_init();
            }
            Err(e) => {
                eprintln!("warning: could not open log file {path}: {e}, logging to stdout");
                let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
            }
        },
        None => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}

/// Blocks until `"exit"` is typed to stdin, then returns so the caller can
/// tear the node down.
async fn wait_for_exit() {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().eq_ignore_ascii_case("exit") {
            break;
        }
    }
}
