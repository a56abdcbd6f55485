//! Demo 1: Public Market Stream
//!
//! Showcases: callback and queue consumers, session hooks, automatic reconnect
//!
//! Run: cargo run --bin public_stream
//! Verbose: RUST_LOG=feedline_ws=debug cargo run --bin public_stream

use colored::*;
use feedline_types::{Side, TickerData, TradeData};
use feedline_ws::{
    Consumer, Hooks, QueuePolicy, ReconnectConfig, SessionConfig, SessionState, StreamSession,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const INSTRUMENTS: [&str; 2] = ["BTC-USDT", "ETH-USDT"];

fn stamp() -> ColoredString {
    format!("[{}]", chrono::Local::now().format("%H:%M:%S%.3f")).dimmed()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    println!("{}", "═".repeat(65).cyan());
    println!("{}", "  PUBLIC MARKET STREAM".cyan().bold());
    println!("{}", "  Feedline Demo - Tickers by queue, trades by callback".cyan());
    println!("{}", "═".repeat(65).cyan());
    println!();

    let hooks = Hooks::new()
        .on_state_change(|from, to| {
            let to_str = match to {
                SessionState::Active => to.to_string().green(),
                SessionState::Disconnected | SessionState::Closed => to.to_string().red(),
                _ => to.to_string().yellow(),
            };
            println!("  {} {} {} → {}", stamp(), "●".blue(), from, to_str);
        })
        .on_reconnect_attempt(|attempt, delay| {
            println!(
                "  {} {} Reconnect attempt {} in {:?}",
                stamp(),
                "↻".yellow(),
                attempt,
                delay
            );
        })
        .on_error(|error| {
            println!("  {} {} {}", stamp(), "✗".red(), error.to_string().red());
        });

    let config = SessionConfig::public()
        .with_reconnect(ReconnectConfig::fixed(Duration::from_secs(3), 5));
    let session = StreamSession::builder(config).with_hooks(hooks).build()?;

    session.connect().await?;

    let (tickers, mut ticker_rx) = Consumer::queue(256, QueuePolicy::DropNewest);
    session.subscribe("tickers", "BTC-USDT", tickers).await?;

    for inst in INSTRUMENTS {
        session
            .subscribe(
                "trades",
                inst,
                Consumer::callback(|event| {
                    let Ok(trades) = event.decode::<TradeData>() else {
                        return;
                    };
                    for trade in trades {
                        let side = match trade.side {
                            Side::Buy => "BUY ".green(),
                            Side::Sell => "SELL".red(),
                        };
                        println!(
                            "  {} {} {:<10} {} @ {}",
                            stamp(),
                            side,
                            trade.inst_id,
                            trade.size,
                            trade.price
                        );
                    }
                }),
            )
            .await?;
    }

    println!("  Subscribed: {:?}", session.subscriptions());
    println!();

    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    let mut ticker_count = 0u64;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = ticker_rx.recv() => {
                let Some(event) = event else { break };
                for ticker in event.decode::<TickerData>()? {
                    ticker_count += 1;
                    println!(
                        "  {} {} {:<10} last={} bid={} ask={}",
                        stamp(),
                        "◆".cyan(),
                        ticker.inst_id,
                        ticker.last.to_string().white().bold(),
                        ticker.bid_price,
                        ticker.ask_price
                    );
                }
            }
        }
    }

    session.close().await;

    println!();
    println!("{}", "  SESSION SUMMARY".white().bold());
    println!("  {}", "─".repeat(50));
    println!("  Tickers received: {}", ticker_count.to_string().cyan());
    println!("  Tickers dropped:  {}", ticker_rx.dropped().to_string().cyan());

    Ok(())
}
