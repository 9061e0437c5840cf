//! Task submission, listing, inspection and cancellation.

use std::io::Read;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::http::{base_url, get_json, post_json, post_json_body};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskJson {
    pub request_id: String,
    pub kind: String,
    pub status: String,
    pub progress: f64,
    pub submitted_at: u64,
    pub updated_at: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub elapsed_ms: Option<u64>,
}

#[derive(Deserialize)]
struct TasksResponse {
    tasks: Vec<TaskJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    request_id: String,
    submitted_at: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelResponse {
    request_id: String,
    cancelled: bool,
}

/// Leading 16 characters of a request id.
pub fn short(id: &str) -> &str {
    id.get(..16).unwrap_or(id)
}

pub async fn cmd_tasks(port: u16) -> Result<()> {
    let resp: TasksResponse = get_json(&format!("{}/tasks", base_url(port))).await?;

    if resp.tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Tasks ({})", resp.tasks.len());
    println!("═══════════════════════════════════════");

    for t in &resp.tasks {
        print_task(t, false);
    }

    Ok(())
}

pub async fn cmd_task(port: u16, request_id: &str) -> Result<()> {
    let task: TaskJson = get_json(&format!("{}/tasks/{}", base_url(port), request_id))
        .await
        .with_context(|| format!("no task {}", request_id))?;
    print_task(&task, true);
    Ok(())
}

/// Submit a task read from `source`, a file path or `-` for stdin.
pub async fn cmd_submit(port: u16, source: &str) -> Result<()> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read task from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read {}", source))?
    };
    let task: serde_json::Value = serde_json::from_str(&raw).context("task must be valid JSON")?;

    let resp: SubmitResponse = post_json_body(&format!("{}/tasks", base_url(port)), &task).await?;

    println!("Task submitted:");
    println!("  Request ID : {}", resp.request_id);
    println!("  Submitted  : {}", resp.submitted_at);

    Ok(())
}

pub async fn cmd_cancel(port: u16, request_id: &str) -> Result<()> {
    let resp: CancelResponse =
        post_json(&format!("{}/tasks/{}/cancel", base_url(port), request_id)).await?;

    if resp.cancelled {
        println!("Cancellation requested for {}...", short(&resp.request_id));
    } else {
        println!("{}... is not in flight.", short(&resp.request_id));
    }
    Ok(())
}

fn print_task(t: &TaskJson, full: bool) {
    println!("  ┌─ {}...", short(&t.request_id));
    println!("  │  kind         : {}", t.kind);
    println!("  │  status       : {}", t.status);
    println!("  │  progress     : {:.1}%", t.progress);
    println!("  │  submitted_at : {}", t.submitted_at);
    println!("  │  updated_at   : {}", t.updated_at);
    if let Some(ms) = t.elapsed_ms {
        println!("  │  elapsed      : {}ms", ms);
    }
    if let Some(ref error) = t.error {
        println!("  │  error        : {}", error);
    }
    if full {
        if let Some(ref result) = t.result {
            let pretty = serde_json::to_string_pretty(result).unwrap_or_default();
            for line in pretty.lines() {
                println!("  │  {}", line);
            }
        }
    }
    println!("  └─");
}
