//! quarry-ctl — command-line interface for the Quarry daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 9400;

fn print_usage() {
    println!("Usage: quarry-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status              Show request counts and in-flight requests");
    println!("  tasks               List every tracked request");
    println!("  task <id>           Show one request, including its result");
    println!("  submit <file|->     Submit a task JSON document");
    println!("  cancel <id>         Cancel an in-flight request");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["tasks"] => cmd::tasks::cmd_tasks(port).await,
        ["task", id] => cmd::tasks::cmd_task(port, id).await,
        ["submit", source] => cmd::tasks::cmd_submit(port, source).await,
        ["cancel", id] => cmd::tasks::cmd_cancel(port, id).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_usage();
            std::process::exit(1);
        }
    }
}
