//! Listen command - join an organization's channel and print what arrives.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use beacon_core::config::ConfigHandle;
use beacon_core::error::{BeaconError, BeaconResult};
use beacon_services::{QueryCache, RealtimeService, Service, SessionContext};
use beacon_socket::{ConnectionState, InboundMessage};

/// Run the listen command.
pub async fn run(config: ConfigHandle, org: String, user: String, json: bool) -> BeaconResult<()> {
    let cfg = config.read().await.clone();
    if !cfg.realtime.is_active() {
        println!(
            "  {} Realtime is disabled. Set realtime.enabled and realtime.url in the config.",
            style("FAIL").red().bold()
        );
        return Err(BeaconError::MissingConfig("realtime.enabled / realtime.url".into()));
    }

    let tokens = super::open_token_store(&cfg)?;
    let session = SessionContext::new();
    let cache = Arc::new(QueryCache::new());
    let mut service = RealtimeService::from_config(&cfg, session.clone(), cache, tokens)?;
    let (_subscription, mut messages) = service.subscribe_channel();

    service.init()?;
    let mut states = service
        .state_receiver()
        .ok_or_else(|| BeaconError::Internal("realtime manager is not running".into()))?;
    session.sign_in(user, Some(org.clone()));
    info!("listening on organization {org}");

    let spinner = (!json).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("connecting to {org}..."));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    let emit = |line: String| match &spinner {
        Some(pb) => pb.suspend(|| println!("{line}")),
        None => println!("{line}"),
    };

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if let Some(pb) = &spinner {
                    pb.set_message(state_message(&state));
                }
                if json {
                    emit(serde_json::json!({ "state": state.to_string() }).to_string());
                }
            }
            message = messages.recv() => match message {
                Some(message) => emit(if json { json_line(&message) } else { text_line(&message) }),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if let Some(pb) = &spinner {
                    pb.suspend(|| println!("\n  Disconnecting..."));
                }
                break;
            }
        }
    }

    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    service.shutdown()
}

fn state_message(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Idle => "idle".to_string(),
        ConnectionState::Connecting(scope) => format!("connecting to {}...", scope.organization_id),
        ConnectionState::Open(scope) => format!(
            "{} listening on {}",
            style("connected").green(),
            scope.organization_id
        ),
        ConnectionState::Closed { intentional: false, .. } => {
            format!("{} reconnecting shortly...", style("disconnected").yellow())
        }
        ConnectionState::Closed { .. } => "closed".to_string(),
        ConnectionState::Failed(_) => format!("{} giving up", style("failed").red()),
    }
}

fn json_line(message: &InboundMessage) -> String {
    serde_json::json!({
        "receivedAt": Local::now().to_rfc3339(),
        "message": message,
    })
    .to_string()
}

fn text_line(message: &InboundMessage) -> String {
    let time = Local::now().format("%H:%M:%S");
    match message {
        InboundMessage::Change(change) => {
            let row = change.new.as_ref().or(change.old.as_ref());
            format!(
                "  {} {} {} {}",
                style(time).dim(),
                style(format!("[{}]", change.event_type)).cyan(),
                style(&change.table).bold(),
                row.map(|r| super::truncate(&r.to_string(), 80)).unwrap_or_default()
            )
        }
        InboundMessage::Broadcast(event) => format!(
            "  {} {} {} {}",
            style(time).dim(),
            style("[broadcast]").magenta(),
            style(&event.event).bold(),
            if event.payload.is_null() {
                String::new()
            } else {
                super::truncate(&event.payload.to_string(), 80)
            }
        ),
    }
}
