//! Demo 2: Private Account Stream
//!
//! Showcases: login with credentials from the environment, private channels
//!
//! Requires FEEDLINE_API_KEY, FEEDLINE_API_SECRET and FEEDLINE_API_PASSPHRASE.
//! Run: cargo run --bin private_stream
//! Demo trading endpoint: FEEDLINE_DEMO=1 cargo run --bin private_stream

use colored::*;
use feedline_auth::Credentials;
use feedline_ws::{Consumer, Hooks, QueuePolicy, SessionConfig, StreamSession};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const CHANNELS: [&str; 3] = ["orders", "positions", "account"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("{}", "═".repeat(65).cyan());
    println!("{}", "  PRIVATE ACCOUNT STREAM".cyan().bold());
    println!("{}", "  Feedline Demo - Authenticated channels".cyan());
    println!("{}", "═".repeat(65).cyan());
    println!();

    let credentials = match Credentials::from_env() {
        Ok(credentials) => credentials,
        Err(e) => {
            println!("  {} {}", "✗".red(), e.to_string().red());
            return Ok(());
        }
    };
    println!("  Credentials: {:?}", credentials);

    let demo = std::env::var("FEEDLINE_DEMO").is_ok();
    let hooks = Hooks::new()
        .on_state_change(|from, to| println!("  {} {} → {}", "●".blue(), from, to))
        .on_control(|frame| println!("  {} {:?} {:?}", "✓".green(), frame.event, frame.arg))
        .on_error(|error| println!("  {} {}", "✗".red(), error.to_string().red()));

    let session = StreamSession::builder(SessionConfig::private().with_demo(demo))
        .with_credentials(credentials)
        .with_hooks(hooks)
        .build()?;

    println!("  Endpoint: {}", session.url().cyan());
    session.connect().await?;

    // One queue shared by every private channel; the event key tells them apart
    let (consumer, mut rx) = Consumer::queue(1024, QueuePolicy::Block);
    let mut forwarders = Vec::new();
    for channel in CHANNELS {
        let (c, mut r) = Consumer::queue(256, QueuePolicy::Block);
        session.subscribe(channel, "", c).await?;
        let sink = consumer.clone();
        forwarders.push(tokio::spawn(async move {
            while let Some(event) = r.recv().await {
                sink.deliver(event).await;
            }
        }));
    }

    println!("  Subscribed: {:?}", session.subscriptions());
    println!("  Listening for 60 seconds (Ctrl+C to stop)...");
    println!();

    let deadline = tokio::time::sleep(Duration::from_secs(60));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                println!(
                    "  {} {} {} records",
                    chrono::Local::now().format("%H:%M:%S").to_string().dimmed(),
                    event.key.to_string().yellow(),
                    event.data.len()
                );
            }
        }
    }

    session.close().await;
    for forwarder in forwarders {
        let _ = forwarder.await;
    }
    println!();
    println!("  {} Session closed", "●".dimmed());

    Ok(())
}
