//! Human-readable rendering of jobs/workers/config for the terminal.
//!
//! This is the "human-readable rendering of list/status output" the
//! distilled spec calls out as an external collaborator (§1); it is kept
//! deliberately dumb — plain aligned `println!` text, no terminal styling.

use std::collections::BTreeMap;

use crate::model::{Job, JobState, WorkerRow};

pub fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("(no jobs)");
        return;
    }
    for j in jobs {
        println!(
            "{:<24} {:<10} attempts={}/{} due={} cmd={}",
            j.id, j.state, j.attempts, j.max_retries, j.due_at, j.command
        );
    }
}

pub fn print_status(counts: &BTreeMap<String, i64>, workers: &[WorkerRow]) {
    println!("Jobs:");
    let mut total = 0;
    for state in JobState::all() {
        let c = counts.get(state.as_str()).copied().unwrap_or(0);
        total += c;
        println!("  {:<10}: {}", state.as_str(), c);
    }
    println!("  total     : {total}");

    println!("\nWorkers:");
    if workers.is_empty() {
        println!("  (none running)");
    } else {
        for w in workers {
            println!("  {} pid={} status={} hb={}", w.id, w.pid, w.status, w.heartbeat_at);
        }
    }
}

pub fn print_config(cfg: &BTreeMap<String, String>) {
    for (k, v) in cfg {
        println!("{k} = {v}");
    }
}

pub fn print_dlq(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("(no jobs in DLQ)");
        return;
    }
    println!("Dead Letter Queue ({} jobs):", jobs.len());
    for j in jobs {
        println!();
        println!("  ID: {}", j.id);
        println!("  Command: {}", j.command);
        println!("  Attempts: {}/{}", j.attempts, j.max_retries);
        println!("  Last Error: {}", j.last_error.as_deref().unwrap_or(""));
        println!("  Created: {}", j.created_at);
        println!("  Failed: {}", j.updated_at);
    }
}
