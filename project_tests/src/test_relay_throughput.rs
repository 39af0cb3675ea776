//! Connects to a running relay's `/events` stream and reports the message rate
//! once per interval. Intended for manual checks against a live deployment.

use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use project_tests::SseReader;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Relay base URL
    #[clap(short, long, default_value = "http://127.0.0.1:5000")]
    url: String,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 10)]
    report_interval_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let interval = Duration::from_secs(args.report_interval_seconds.max(1));

    let response = reqwest::get(format!("{}/events", args.url.trim_end_matches('/'))).await?;
    anyhow::ensure!(response.status().is_success(), "relay answered {}", response.status());
    let mut reader = SseReader::new(response);

    let mut total: u64 = 0;
    loop {
        let mut count: u64 = 0;
        let deadline = tokio::time::Instant::now() + interval;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, reader.next_event()).await {
                Ok(Some(_)) => count += 1,
                Ok(None) => {
                    println!("{} stream closed by relay after {} messages", Utc::now().to_rfc3339(), total + count);
                    return Ok(());
                }
                Err(_) => break,
            }
        }

        total += count;
        println!(
            "{} {:.1} msg/s ({} in last {}s, {} total, {} keep-alives)",
            Utc::now().to_rfc3339(),
            count as f64 / interval.as_secs_f64(),
            count,
            interval.as_secs(),
            total,
            reader.comments
        );
    }
}
