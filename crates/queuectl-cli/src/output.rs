//! Table rendering for CLI output.

use console::style;
use queuectl_core::{time, Job, JobState, WorkerRegistration};
use queuectl_store::StateCounts;

const COMMAND_COLUMN_MAX: usize = 48;

/// Prints a table of jobs: id, command, attempts, updated time, last error.
pub fn print_jobs(title: &str, jobs: &[Job]) {
    println!("{}", style(title).bold());

    let headers = ["JOB ID", "COMMAND", "ATTEMPTS", "UPDATED AT", "LAST ERROR"];
    let rows: Vec<[String; 5]> = jobs
        .iter()
        .map(|job| {
            [
                job.id.to_string(),
                truncate(&job.command, COMMAND_COLUMN_MAX),
                job.attempts.to_string(),
                time::format(job.updated_at),
                job.last_error.clone().unwrap_or_default(),
            ]
        })
        .collect();

    print_table(&headers, &rows);
}

/// Prints per-state counts and the active worker pids.
pub fn print_status(counts: &StateCounts, workers: &[WorkerRegistration]) {
    println!("{}", style("queuectl status").bold());

    let headers = ["STATE", "COUNT"];
    let rows: Vec<[String; 2]> = JobState::ALL
        .iter()
        .map(|state| [state.to_string(), counts.get(*state).to_string()])
        .collect();
    print_table(&headers, &rows);

    let pids: Vec<String> = workers.iter().map(|w| w.pid.to_string()).collect();
    if pids.is_empty() {
        println!("Active workers: 0");
    } else {
        println!("Active workers: {} [{}]", workers.len(), pids.join(", "));
    }
}

/// Prints the config table.
pub fn print_config(entries: &[(String, String)]) {
    println!("{}", style("configuration").bold());

    let headers = ["KEY", "VALUE"];
    let rows: Vec<[String; 2]> = entries
        .iter()
        .map(|(key, value)| [key.clone(), value.clone()])
        .collect();
    print_table(&headers, &rows);
}

fn print_table<const N: usize>(headers: &[&str; N], rows: &[[String; N]]) {
    let mut widths: [usize; N] = [0; N];
    for (i, header) in headers.iter().enumerate() {
        widths[i] = header.len();
    }
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let header_line = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:<width$}", h, width = widths[i]))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", style(header_line).cyan());

    for row in rows {
        let line = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{}", line.trim_end());
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max.saturating_sub(1);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
