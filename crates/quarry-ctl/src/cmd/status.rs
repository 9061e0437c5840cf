//! Daemon status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};
use super::tasks::{short, TaskJson};

#[derive(Deserialize)]
struct StatusResponse {
    counts: StatusCounts,
    in_flight: Vec<TaskJson>,
}

#[derive(Deserialize)]
struct StatusCounts {
    queued: usize,
    running: usize,
    completed: usize,
    failed: usize,
    cancelled: usize,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Quarry Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Queued    : {}", resp.counts.queued);
    println!("  Running   : {}", resp.counts.running);
    println!("  Completed : {}", resp.counts.completed);
    println!("  Failed    : {}", resp.counts.failed);
    println!("  Cancelled : {}", resp.counts.cancelled);

    if resp.in_flight.is_empty() {
        println!("\n  No requests in flight.");
    } else {
        println!("\n  In flight:");
        for t in &resp.in_flight {
            println!(
                "  {}...  {:<30} {:>5.1}%",
                short(&t.request_id),
                t.kind,
                t.progress
            );
        }
    }

    Ok(())
}
