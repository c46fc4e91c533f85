//! Live status watch command

use anyhow::Result;
use colored::Colorize;
use std::time::Duration;

use crate::client::{ApiClient, NodeStatus};
use crate::output::{color_signal, format_rate, print_error};

/// Poll the status endpoint and print one line per sample.
///
/// `count` bounds the number of samples; `None` runs until interrupted.
pub async fn watch(client: &ApiClient, interval_secs: u64, count: Option<u64>) -> Result<()> {
    if count == Some(0) {
        return Ok(());
    }

    println!(
        "{:<20} {:>10} {:>6} {:>6} {:>14} {:>10} {:>7}",
        "TIME".bold(),
        "SIGNAL".bold(),
        "HIGH".bold(),
        "LOW".bold(),
        "LOW RATE".bold(),
        "LIMITED".bold(),
        "ERRORS".bold()
    );

    let mut remaining = count;
    loop {
        match client.get::<NodeStatus>("/status").await {
            Ok(status) => print_sample(&status),
            Err(e) => print_error(&format!("Poll failed: {}", e)),
        }

        if let Some(left) = remaining.as_mut() {
            *left -= 1;
            if *left == 0 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_secs(interval_secs.max(1))).await;
    }

    Ok(())
}

fn print_sample(status: &NodeStatus) {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    println!(
        "{:<20} {:>10} {:>6} {:>6} {:>14} {:>10} {:>7}",
        now,
        color_signal(&status.contention),
        status.high_priority_pods,
        status.low_priority_pods,
        format_rate(status.smoothed_low_bps),
        status.throttled.len(),
        status.error_count
    );
}
