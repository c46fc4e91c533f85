//! Controller status command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, NodeStatus};
use crate::output::{color_signal, format_rate, format_timestamp, print_warning, OutputFormat};

/// Row for the recent decisions table
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Signal")]
    signal: String,
    #[tabled(rename = "Resolved")]
    resolved: usize,
    #[tabled(rename = "Skipped")]
    skipped: usize,
    #[tabled(rename = "Applied")]
    applied: usize,
    #[tabled(rename = "Errors")]
    errors: usize,
}

/// Show the controller status for one node
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: NodeStatus = client.get("/status").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&status)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Controller Status".bold());
            println!("{}", "=".repeat(60));
            println!("Node:               {}", status.node_name.cyan());
            println!("Contention:         {}", color_signal(&status.contention));
            println!("High-priority pods: {}", status.high_priority_pods);
            println!("Low-priority pods:  {}", status.low_priority_pods);
            println!(
                "Low-class rate:     {}",
                format_rate(status.smoothed_low_bps)
            );
            match status.low_class_limit {
                Some(limit) => println!(
                    "Low-class limit:    read {} / write {}",
                    format_rate(limit.read_bps),
                    format_rate(limit.write_bps)
                ),
                None => println!("Low-class limit:    (no managed pods)"),
            }
            println!("Errors:             {}", status.error_count);
            if let Some(error) = &status.last_error {
                println!("Last error:         {}", error.red());
            }
            match status.last_update {
                Some(ts) => println!("Last update:        {}", format_timestamp(ts)),
                None => print_warning("No successful discovery yet"),
            }

            println!();
            println!("{}", "Effective Configuration".bold());
            println!("{}", "-".repeat(60));
            println!(
                "Poll interval:      {}s",
                status.config.poll_interval_secs
            );
            println!("Priority label:     {}", status.config.priority_label);
            println!("Shared mount:       {}", status.config.shared_mount_path);
            println!(
                "Ceiling:            read {} / write {}",
                format_rate(status.config.read_ceiling_bps),
                format_rate(status.config.write_ceiling_bps)
            );
            println!(
                "Floor:              read {} / write {}",
                format_rate(status.config.read_floor_bps),
                format_rate(status.config.write_floor_bps)
            );
            println!(
                "Saturation:         {}",
                format_rate(status.config.saturation_bps)
            );
            println!(
                "Hysteresis:         trigger {} ticks / cooldown {} ticks",
                status.config.trigger_ticks, status.config.cooldown_ticks
            );

            if !status.decisions.is_empty() {
                println!();
                println!("{}", "Recent Ticks".bold());
                let rows: Vec<DecisionRow> = status
                    .decisions
                    .iter()
                    .rev()
                    .map(|d| DecisionRow {
                        time: format_timestamp(d.timestamp),
                        signal: color_signal(&d.signal),
                        resolved: d.resolved,
                        skipped: d.skipped,
                        applied: d.applied,
                        errors: d.errors,
                    })
                    .collect();

                let table = tabled::Table::new(rows)
                    .with(tabled::settings::Style::rounded())
                    .to_string();
                println!("{}", table);
            }

            println!();
            println!(
                "Throttled containers: {} (use `drcio limits` for details)",
                status.throttled.len()
            );
        }
    }

    Ok(())
}
