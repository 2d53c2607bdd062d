use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{self, bail};
use dbdock_common::{LogEntry, ManagedInstance};
use dbdock_engine::{DockConfig, DockerEngine, Orchestrator};
use dbdock_store::{InstanceStore, JsonFileStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut store = JsonFileStore::new(&cli.settings);
    if let Some(root) = &cli.volume_root {
        store = store.with_volume_root(root);
    }
    let mut instances = store.load().await?;

    if let Commands::List = cli.command {
        print_instances(&instances);
        return Ok(());
    }

    let config = DockConfig::from_env();
    info!(?config, "Connecting to Docker");
    let engine = DockerEngine::connect()?;
    let orchestrator = Orchestrator::new(Arc::new(engine), config);
    orchestrator.check_engine().await?;
    reconcile(&orchestrator, &store, &mut instances).await?;

    let progress = |message: &str| println!("  {message}");
    let outcome = match cli.command {
        Commands::List => Ok(()),
        Commands::Status => {
            print_instances(&instances);
            Ok(())
        }
        Commands::Start { names } => {
            let failures = if names.is_empty() {
                orchestrator.start_all(&mut instances, &progress).await
            } else {
                let mut failures = Vec::new();
                for index in select(&instances, &names)? {
                    let instance = &mut instances[index];
                    println!("Starting {}", instance.name);
                    if let Err(err) = orchestrator.start_instance(instance, &progress).await {
                        failures.push((instance.name.clone(), err));
                    }
                }
                failures
            };
            store.save(&instances).await?;
            print_instances(&instances);
            report(failures)
        }
        Commands::Stop { names } => {
            let failures = if names.is_empty() {
                orchestrator.stop_all(&mut instances).await
            } else {
                let mut failures = Vec::new();
                for index in select(&instances, &names)? {
                    let instance = &mut instances[index];
                    println!("Stopping {}", instance.name);
                    if let Err(err) = orchestrator.stop_instance(instance).await {
                        failures.push((instance.name.clone(), err));
                    }
                }
                failures
            };
            store.save(&instances).await?;
            print_instances(&instances);
            report(failures)
        }
        Commands::Watch { name } => watch(&orchestrator, name.as_deref()).await,
    };

    orchestrator.shutdown().await;
    outcome
}

/// Refreshes every instance from the engine and persists what changed.
async fn reconcile(
    orchestrator: &Orchestrator,
    store: &dyn InstanceStore,
    instances: &mut [ManagedInstance],
) -> eyre::Result<()> {
    orchestrator.refresh_status(instances).await;
    store.save(instances).await?;
    Ok(())
}

/// Indices of the instances named in `names`.
fn select(instances: &[ManagedInstance], names: &[String]) -> eyre::Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            instances
                .iter()
                .position(|i| i.name.eq_ignore_ascii_case(name.trim()))
                .ok_or_else(|| eyre::eyre!("No instance named '{name}'"))
        })
        .collect()
}

fn report(failures: Vec<(String, dbdock_common::DockError)>) -> eyre::Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    for (name, err) in &failures {
        eprintln!("{name}: {err}");
    }
    bail!("{} instance(s) failed", failures.len())
}

fn print_instances(instances: &[ManagedInstance]) {
    println!(
        "{:<16} {:<11} {:<8} {:>6}  {:<9} {:<12} CONNECTION",
        "NAME", "TYPE", "VERSION", "PORT", "STATUS", "CONTAINER"
    );
    for instance in instances {
        let container = instance
            .container_id
            .as_deref()
            .map(|id| &id[..id.len().min(12)])
            .unwrap_or("-");
        println!(
            "{:<16} {:<11} {:<8} {:>6}  {:<9} {:<12} {}",
            instance.name,
            instance.kind.display_name(),
            instance.version,
            instance.port,
            instance.status.to_string(),
            container,
            instance.connection_string()
        );
        if let Some(err) = &instance.last_error {
            println!("{:<16} last error: {err}", "");
        }
    }
}

/// Prints new log entries until Ctrl-C.
async fn watch(orchestrator: &Orchestrator, name: Option<&str>) -> eyre::Result<()> {
    let logs = orchestrator.logs().clone();
    let snapshot = || match name {
        Some(name) => logs.instance_logs(name),
        None => logs.global_logs(),
    };
    if let Some(name) = name {
        if !orchestrator.streams().is_attached(name) {
            println!("{name} is not running; waiting for entries anyway");
        }
    }

    let mut last: Option<LogEntry> = None;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                println!();
                return Ok(());
            }
            _ = ticker.tick() => {
                let entries = snapshot();
                let start = last
                    .as_ref()
                    .and_then(|seen| entries.iter().rposition(|e| e == seen))
                    .map(|index| index + 1)
                    .unwrap_or(0);
                for entry in &entries[start..] {
                    println!("{entry}");
                }
                if let Some(newest) = entries.last() {
                    last = Some(newest.clone());
                }
            }
        }
    }
}
