//! `roadwatch` - CLI for the roadwatch sensor fusion engine
//!
//! This binary runs the ingestion server and provides commands for
//! inspecting stored incidents and interacting with a running server.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use roadwatch::cli::{Cli, Command, ConfigCommand, IncidentsCommand, SosCommand, WatchCommand};
use roadwatch::escalation::Trigger;
use roadwatch::poll::{self, HttpSource};
use roadwatch::{init_logging, notify, Config, Engine, Sidecar, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Serve(cmd) => handle_serve(config, cmd.bind).await,
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Incidents(cmd) => handle_incidents(&config, &cmd),
        Command::Sos(cmd) => handle_sos(&config, cmd).await,
        Command::Watch(cmd) => handle_watch(&config, &cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

async fn handle_serve(mut config: Config, bind: Option<String>) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    config.validate()?;

    let db_path = config.database_path();
    let (sidecar, worker) = match Storage::open(&db_path) {
        Ok(storage) => {
            let (sidecar, worker) = Sidecar::spawn(storage, config.storage.queue_capacity);
            (sidecar.with_reply_timeout(config.reply_timeout()), Some(worker))
        }
        Err(e) => {
            warn!(
                path = %db_path.display(),
                error = %e,
                "Database unavailable, running without history"
            );
            (Sidecar::unavailable(), None)
        }
    };

    let pruner = match (config.max_age(), worker.is_some()) {
        (Some(age), true) => {
            let max_age = chrono::Duration::from_std(age).context("max age out of range")?;
            Some(sidecar.spawn_pruner(config.prune_interval(), max_age))
        }
        _ => None,
    };

    let notifier = notify::from_config(&config.escalation);
    if !notifier.is_configured() {
        warn!("No escalation command configured, SOS alerts will only be recorded");
    }

    let engine = Arc::new(Engine::new(&config, sidecar, notifier));
    let result = roadwatch::server::run(Arc::clone(&engine), &config.server.bind).await;

    if let Some(pruner) = pruner {
        pruner.abort();
    }
    let dropped = engine.sidecar().dropped();
    if dropped > 0 {
        warn!(dropped, "Some history entries were dropped");
    }
    info!("Server stopped");
    result.map_err(Into::into)
}

fn open_existing(config: &Config) -> anyhow::Result<Option<Storage>> {
    let path = config.database_path();
    if !path.exists() {
        return Ok(None);
    }
    let storage =
        Storage::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Some(storage))
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = open_existing(config)?;
    let stats = storage.as_ref().map(Storage::stats).transpose()?;

    if json {
        let status = json!({
            "database_path": config.database_path(),
            "bind": config.server.bind,
            "escalation_configured": config.escalation.command.is_some(),
            "storage": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("roadwatch status");
    println!("----------------");
    println!("Database:      {}", config.database_path().display());
    println!("Bind address:  {}", config.server.bind);
    println!(
        "Escalation:    {}",
        config
            .escalation
            .command
            .as_deref()
            .unwrap_or("not configured")
    );
    match stats {
        Some(stats) => {
            println!("Incidents:     {}", stats.incidents);
            println!("Escalations:   {}", stats.escalations);
            println!("Drowsiness:    {} rows", stats.drowsiness_logs);
            println!("Sensor logs:   {} rows", stats.sensor_logs);
            if let Some(newest) = stats.newest_incident {
                println!("Last incident: {}", newest.to_rfc3339());
            }
            println!("Size:          {} bytes", stats.db_size_bytes);
        }
        None => println!("Storage:       no database yet"),
    }
    Ok(())
}

fn handle_incidents(config: &Config, cmd: &IncidentsCommand) -> anyhow::Result<()> {
    let incidents = match open_existing(config)? {
        Some(storage) => storage.recent_incidents(cmd.limit)?,
        None => Vec::new(),
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&incidents)?);
        return Ok(());
    }

    if incidents.is_empty() {
        println!("No incidents recorded.");
        return Ok(());
    }
    for incident in &incidents {
        println!(
            "#{:<5} {}  {:<10} {:>9.5},{:>10.5}  {}",
            incident.id.unwrap_or_default(),
            incident.created_at.format("%Y-%m-%d %H:%M:%S"),
            incident.kind.to_string(),
            incident.latitude,
            incident.longitude,
            if incident.escalated { "escalated" } else { "" }
        );
        if let Some(message) = &incident.message {
            println!("       {message}");
        }
    }
    Ok(())
}

async fn handle_sos(config: &Config, cmd: SosCommand) -> anyhow::Result<()> {
    let trigger = Trigger::from(cmd.trigger);
    let url = format!("{}/api/sos", config.watch.server_url.trim_end_matches('/'));
    let mut body = json!({ "type": trigger.to_string() });
    if let Some(message) = cmd.message {
        body["message"] = json!(message);
    }

    let reply: serde_json::Value = reqwest::Client::new()
        .post(&url)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("posting to {url}"))?
        .error_for_status()?
        .json()
        .await?;

    let accepted = reply["accepted"].as_bool().unwrap_or(false);
    println!(
        "SOS {}: {}",
        if accepted { "sent" } else { "recorded" },
        reply["detail"].as_str().unwrap_or("no detail")
    );
    if let Some(id) = reply["incidentId"].as_i64() {
        println!("Incident id: {id}");
    }
    Ok(())
}

async fn handle_watch(config: &Config, cmd: &WatchCommand) -> anyhow::Result<()> {
    let targets = cmd.targets();
    let source = HttpSource::new(&config.watch.server_url);
    let (manager, mut updates, tasks) = poll::spawn_all(&targets, &config.watch, &source);
    info!(
        count = manager.count(),
        server = %config.watch.server_url,
        "Watching channels"
    );

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => println!(
                    "{} {:<10} {}",
                    update.at.format("%H:%M:%S%.3f"),
                    update.target.to_string(),
                    update.body
                ),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.stop_all();
    for task in tasks {
        task.abort();
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  Bind:               {}", config.server.bind);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Max age (days):     {}", config.storage.max_age_days);
                println!("  Queue capacity:     {}", config.storage.queue_capacity);
                println!();
                println!("[Alerts]");
                println!("  Voice interval:     {}", config.alerts.voice_alert_interval);
                println!("  Window (secs):      {}", config.alerts.window_secs);
                println!("  Assistant at:       {}", config.alerts.assistant_threshold);
                println!("  Escalate at:        {}", config.alerts.escalation_threshold);
                println!("  Auto escalate:      {}", config.alerts.auto_escalate);
                println!();
                println!("[Escalation]");
                println!(
                    "  Command:            {}",
                    config.escalation.command.as_deref().unwrap_or("(none)")
                );
                println!(
                    "  Contact:            {}",
                    config
                        .escalation
                        .emergency_contact
                        .as_deref()
                        .unwrap_or("(none)")
                );
                println!();
                println!("[Watch]");
                println!("  Server URL:         {}", config.watch.server_url);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)).and_then(|c| c.validate().map(|()| c)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
