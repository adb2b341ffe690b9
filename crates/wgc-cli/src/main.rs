//! `wgconverge` binary entrypoint.

mod cli;
mod collaborators;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use collaborators::{LogFirewall, LogReload};
use wgc_converge::{
    ConvergeError, FsStore, InterfaceSpec, KeyPaths, Orchestrator, Settings, StepOutcome,
    X25519Generator, build_peer_set, render_netdev, render_network,
};

/// Errors surfaced to the terminal.
#[derive(Debug, Error)]
enum CliError {
    /// The spec file could not be read.
    #[error("failed to read spec file {path}: {source}")]
    ReadSpec {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The spec file is not valid JSON for an interface spec.
    #[error("failed to parse spec file {path}: {source}")]
    ParseSpec {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The convergence pass failed.
    #[error(transparent)]
    Converge(#[from] ConvergeError),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_spec(path: &PathBuf) -> Result<InterfaceSpec, CliError> {
    let content = fs::read_to_string(path).map_err(|source| CliError::ReadSpec {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CliError::ParseSpec {
        path: path.clone(),
        source,
    })
}

fn run(cli: &Cli) -> Result<bool, CliError> {
    let spec = load_spec(&cli.spec)?;

    if cli.show {
        show(cli, &spec)?;
        return Ok(true);
    }

    let mut settings = Settings::new(&cli.key_dir, &cli.network_dir);
    if cli.chown_root {
        settings = settings.with_root_ownership();
    }

    let mut orchestrator = Orchestrator::new(
        settings,
        X25519Generator::new(),
        FsStore::new(),
        LogFirewall,
        LogReload,
    );

    let report = orchestrator.apply(&spec)?;
    for step in &report.steps {
        let outcome = match &step.outcome {
            StepOutcome::Changed => "changed".to_string(),
            StepOutcome::Unchanged => "ok".to_string(),
            StepOutcome::Failed(e) => format!("FAILED ({e})"),
        };
        println!("{}: {} {}", report.interface, step.step, outcome);
    }
    println!(
        "{}: {} change(s)",
        report.interface,
        report.change_count()
    );

    Ok(report.succeeded())
}

/// Renders both documents to stdout without touching the host.
fn show(cli: &Cli, spec: &InterfaceSpec) -> Result<(), CliError> {
    spec.validate()?;
    let dport = spec.listen_port()?;
    let peers = build_peer_set(spec);
    let key_paths = KeyPaths::for_interface(&cli.key_dir, &spec.name);

    let netdev = render_netdev(spec, dport, &peers, &key_paths, &cli.network_dir, None);
    let network = render_network(spec, &cli.network_dir, None);

    println!("# {}", netdev.path.display());
    print!("{}", netdev.content);
    println!();
    println!("# {}", network.path.display());
    print!("{}", network.content);
    Ok(())
}
