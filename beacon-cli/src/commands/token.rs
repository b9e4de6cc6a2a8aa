//! Token commands - manage the cached bearer token.

use clap::Subcommand;
use console::style;
use dialoguer::Password;

use beacon_api::TokenStore;
use beacon_core::config::ConfigHandle;
use beacon_core::error::{BeaconError, BeaconResult};

#[derive(Subcommand)]
pub enum TokenAction {
    /// Cache a bearer token. Prompts when no value is given.
    Set {
        /// Token value.
        token: Option<String>,
    },
    /// Remove the cached token.
    Clear,
    /// Show whether a token is cached.
    Show {
        /// Print the full token instead of a masked form.
        #[arg(long)]
        reveal: bool,
    },
}

/// Run a token subcommand.
pub async fn run(config: ConfigHandle, action: TokenAction) -> BeaconResult<()> {
    let cfg = config.read().await;
    let store = super::open_token_store(&cfg)?;

    match action {
        TokenAction::Set { token } => {
            let token = match token {
                Some(t) => t,
                None => Password::new()
                    .with_prompt("Bearer token")
                    .interact()
                    .map_err(|e| BeaconError::Internal(e.to_string()))?,
            };
            let token = token.trim().to_string();
            if token.is_empty() {
                return Err(BeaconError::Config("token must not be empty".into()));
            }
            store.set(token);
            println!(
                "  {} Token saved to {}",
                style("OK").green(),
                store.path().display()
            );
        }
        TokenAction::Clear => {
            store.clear();
            println!("  {} Token cleared", style("OK").green());
        }
        TokenAction::Show { reveal } => match store.get() {
            Some(token) if reveal => println!("{token}"),
            Some(token) => println!("  Token: {}", super::mask(&token)),
            None => println!("  No token cached."),
        },
    }
    Ok(())
}
