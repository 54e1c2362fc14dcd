//! Headless smoke run: seed a session from the environment, spawn the sync
//! runtime against the configured API, and print every event it emits.

mod config;
mod logging;

use std::{process::ExitCode, sync::Arc, time::Duration};

use client_core::{ClientCommand, ClientEvent, derive_identity};
use client_http::{ApiGateway, MatchApi, RuntimeConfig, spawn_runtime};
use client_platform::{MemorySessionBackend, SessionVault};
use config::SmokeConfig;
use tracing::info;

const SMOKE_RUN_DURATION: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let vault = SessionVault::new(MemorySessionBackend::default(), "kindled-smoke");
    if let Some(token) = &config.access_token
        && let Err(err) = vault.set_access_token(token)
    {
        eprintln!("failed to seed access token: {err}");
        return ExitCode::FAILURE;
    }
    if let Some(cached_user) = &config.cached_user
        && let Err(err) = vault.set_cached_user(cached_user)
    {
        eprintln!("failed to seed cached user: {err}");
        return ExitCode::FAILURE;
    }

    let identity = derive_identity(
        vault.cached_user().as_deref(),
        vault.access_token().as_deref(),
    );
    match &identity {
        Some(identity) => info!(%identity, "session identity resolved"),
        None => println!(
            "No usable session identity. Set KINDLED_ACCESS_TOKEN (and optionally \
             KINDLED_CACHED_USER) to run a live smoke."
        ),
    }

    let gateway = ApiGateway::new(config.api_url.clone(), vault);
    let unauthorized = gateway.subscribe_unauthorized();
    let handle = spawn_runtime(
        Arc::new(gateway) as Arc<dyn MatchApi>,
        unauthorized,
        identity,
        RuntimeConfig {
            poll_interval: config.poll_interval,
            message_window: config.message_window,
            ..RuntimeConfig::default()
        },
    );

    let mut events = handle.subscribe();
    if let Err(err) = handle.send(ClientCommand::RefreshConversations).await {
        eprintln!("runtime refused the initial refresh: {err}");
        return ExitCode::FAILURE;
    }

    println!(
        "Polling {} for {}s; Ctrl-C to stop early.",
        config.api_url,
        SMOKE_RUN_DURATION.as_secs()
    );
    let run = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    print_event(&event);
                    if matches!(event, ClientEvent::Unauthenticated) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    };
    tokio::select! {
        _ = run => {}
        _ = tokio::time::sleep(SMOKE_RUN_DURATION) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    let _ = handle.send(ClientCommand::Shutdown).await;
    ExitCode::SUCCESS
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::ConversationListUpdated { conversations } => {
            println!("conversations: {} known", conversations.len());
            for conversation in conversations {
                println!(
                    "  {} (last activity: {})",
                    conversation.conversation_id,
                    conversation
                        .last_activity_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| "unknown".to_owned()),
                );
            }
        }
        ClientEvent::ThreadUpdated {
            conversation_id,
            messages,
        } => {
            println!("thread {conversation_id}: {} messages", messages.len());
            if let Some(last) = messages.last() {
                println!("  latest: {}", last.body);
            }
        }
        ClientEvent::SyncPhaseChanged { phase } => println!("sync phase: {phase:?}"),
        ClientEvent::MessageSent { conversation_id } => {
            println!("message sent to {conversation_id}")
        }
        ClientEvent::Notice { kind, text } => println!("notice ({kind:?}): {text}"),
        ClientEvent::Unauthenticated => {
            println!("session rejected; a fresh login is required")
        }
    }
}
