//! Applied limits command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, NodeStatus};
use crate::output::{format_rate, print_info, OutputFormat};

/// Row for the throttled containers table
#[derive(Tabled)]
struct LimitRow {
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Read")]
    read: String,
    #[tabled(rename = "Write")]
    write: String,
}

/// Show the limits currently in force on the node
pub async fn show_limits(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: NodeStatus = client.get("/status").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&status.throttled)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Applied Limits".bold());
            println!("{}", "=".repeat(60));
            println!("Node: {}", status.node_name.cyan());
            println!();

            if status.throttled.is_empty() {
                print_info("No bandwidth limits currently in force");
                return Ok(());
            }

            let rows: Vec<LimitRow> = status
                .throttled
                .iter()
                .map(|t| LimitRow {
                    pod: t.pod_name.clone(),
                    namespace: t.namespace.clone(),
                    container: short_id(&t.container_id),
                    device: t.device.clone(),
                    read: format_rate(t.read_bps),
                    write: format_rate(t.write_bps),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} containers", status.throttled.len());
        }
    }

    Ok(())
}

/// Truncate a 64-hex container id the way container tooling does.
fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_truncates() {
        let id = "a".repeat(64);
        assert_eq!(short_id(&id), "a".repeat(12));
        assert_eq!(short_id("short"), "short");
    }
}
