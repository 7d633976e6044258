use std::sync::Arc;
use std::time::Duration;

use jobstream::websocket::{callback, EventRouter};
use jobstream::{ConnectionState, Event, EventKind, JobsClient, ManagerConfig, PollingFallback};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobstream=debug")),
        )
        .init();

    let ws_url =
        std::env::var("JOBSTREAM_WS_URL").unwrap_or_else(|_| "ws://localhost:8000/ws".into());
    let api_url =
        std::env::var("JOBSTREAM_API_URL").unwrap_or_else(|_| "http://localhost:8000/api".into());

    let config = ManagerConfig::new(ws_url)
        .base_delay(Duration::from_secs(1))
        .max_attempts(5);
    let router = Arc::new(EventRouter::from_config(config)?);

    router.on(
        EventKind::Progress,
        callback(|event| {
            if let Some(payload) = event.payload() {
                println!("[progress] {}", payload);
            }
        }),
    );
    router.on(
        EventKind::Result,
        callback(|event| {
            if let Some(payload) = event.payload() {
                println!("[result] {}", payload);
            }
        }),
    );
    router.on(
        EventKind::Complete,
        callback(|event| {
            if let Some(payload) = event.payload() {
                println!("[complete] {}", payload);
            }
        }),
    );
    router.on(
        EventKind::Error,
        callback(|event| {
            if let Event::Error(err) = event {
                eprintln!("❌ {:?} error: {}", err.source, err.message);
            }
        }),
    );

    // Reply to the connection greeting so the server knows we are alive
    let greeter = Arc::downgrade(&router);
    router.on(
        EventKind::Connected,
        callback(move |event| {
            if let Event::Connected { client_id, channels } = event {
                println!("✅ Connected as {} to {:?}", client_id, channels);
                if let Some(router) = greeter.upgrade() {
                    router.send(&serde_json::json!({ "type": "ping" }));
                }
            }
        }),
    );
    router.on(
        EventKind::Disconnected,
        callback(|event| {
            if let Event::Disconnected {
                code,
                reason,
                will_reconnect,
            } = event
            {
                println!(
                    "Disconnected ({} {}), reconnecting: {}",
                    code, reason, will_reconnect
                );
            }
        }),
    );
    router.on(
        EventKind::Reconnecting,
        callback(|event| {
            if let Event::Reconnecting { attempt, delay } = event {
                println!("Reconnect attempt {} in {:?}", attempt, delay);
            }
        }),
    );
    router.on(
        EventKind::MaxReconnectAttempts,
        callback(|_| eprintln!("Giving up on the live connection")),
    );

    router.connect(["analysis", "alerts"]);

    let driver = Arc::clone(&router);
    tokio::spawn(async move { driver.run().await });

    // Poll a job over HTTP while the socket is down, if one was given
    if let Some(job_id) = std::env::args().nth(1) {
        let fallback = PollingFallback::new(Arc::clone(&router), JobsClient::new(&api_url));
        let status = fallback
            .watch(&job_id, |status| {
                println!("[poll] {} {:?} {:?}", status.id, status.status, status.progress)
            })
            .await;
        println!("Job {} finished: {:?}", job_id, status.status);
    } else {
        tokio::signal::ctrl_c().await?;
    }

    router.disconnect();
    while router.state() != ConnectionState::Disconnected {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}
