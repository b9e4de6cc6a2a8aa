//! Status command - show the effective realtime configuration.

use std::path::PathBuf;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;

use beacon_api::TokenStore;
use beacon_core::config::ConfigHandle;
use beacon_core::error::BeaconResult;

/// Run the status command.
pub async fn run(config: ConfigHandle, config_path: Option<PathBuf>, json: bool) -> BeaconResult<()> {
    let cfg = config.read().await;

    let ticket_url = cfg.ticket_url().ok();
    let token_path = cfg.effective_token_path().ok();
    let token_cached = match super::open_token_store(&cfg) {
        Ok(store) => store.get().is_some(),
        Err(_) => false,
    };
    let config_source = config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());

    if json {
        let out = serde_json::json!({
            "config": config_source,
            "api_base": cfg.server.api_base,
            "ticket_url": ticket_url,
            "session_cookie": cfg.server.session_cookie.is_some(),
            "realtime": {
                "enabled": cfg.realtime.enabled,
                "url": cfg.realtime.url,
                "active": cfg.realtime.is_active(),
                "reconnect_delay_ms": cfg.realtime.reconnect_delay_ms,
                "max_reconnect_attempts": cfg.realtime.max_reconnect_attempts,
                "handshake_timeout_ms": cfg.realtime.handshake_timeout_ms,
                "auth_invalidation_events": cfg.realtime.auth_invalidation_events,
            },
            "token": {
                "cached": token_cached,
                "path": token_path.as_ref().map(|p| p.display().to_string()),
            },
        });
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Setting", "Value"]);

    let or_unset = |v: &str| if v.is_empty() { "(not set)".to_string() } else { v.to_string() };
    let max_attempts = match cfg.realtime.max_reconnect_attempts {
        0 => "unlimited".to_string(),
        n => n.to_string(),
    };

    table.add_row(vec!["Config".to_string(), config_source]);
    table.add_row(vec!["API base".to_string(), or_unset(&cfg.server.api_base)]);
    table.add_row(vec![
        "Ticket endpoint".to_string(),
        ticket_url.unwrap_or_else(|| "(not set)".to_string()),
    ]);
    table.add_row(vec!["Realtime URL".to_string(), or_unset(&cfg.realtime.url)]);
    table.add_row(vec![
        "Reconnect delay".to_string(),
        format!("{} ms", cfg.realtime.reconnect_delay_ms),
    ]);
    table.add_row(vec!["Max reconnect attempts".to_string(), max_attempts]);
    table.add_row(vec![
        "Handshake timeout".to_string(),
        format!("{} ms", cfg.realtime.handshake_timeout_ms),
    ]);
    table.add_row(vec![
        "Auth invalidation events".to_string(),
        cfg.realtime.auth_invalidation_events.join(", "),
    ]);
    table.add_row(vec![
        "Bearer token".to_string(),
        if token_cached { "cached" } else { "none" }.to_string(),
    ]);

    println!("{}", style("Realtime").bold().underlined());
    println!(
        "  Status: {}",
        if cfg.realtime.is_active() {
            style("active").green().to_string()
        } else if cfg.realtime.enabled {
            style("enabled, no url").yellow().to_string()
        } else {
            style("disabled").dim().to_string()
        }
    );
    println!("{table}");
    Ok(())
}
