use std::fmt::Write as _;

use {
    anyhow::Result,
    chrono::{DateTime, Utc},
    gridctl_runtime::{Orchestrator, WorkloadStatus, select_runtime},
    gridctl_state::{DaemonState, StateStore},
    tracing::warn,
};

/// Gateway liveness comes from the state store and container liveness from
/// the engine; either half is shown even when the other cannot be read.
pub async fn handle_status(runtime: &str, topology: Option<&str>) -> Result<()> {
    let store = StateStore::new();
    let gateways: Vec<(DaemonState, bool)> = store
        .list()?
        .into_iter()
        .filter(|s| topology.is_none_or(|t| s.topology == t))
        .map(|s| {
            let running = store.is_running(&s);
            (s, running)
        })
        .collect();

    let containers = match select_runtime(runtime) {
        Ok(runtime) => match Orchestrator::new(runtime).status(topology).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "cannot list containers");
                eprintln!("Containers unavailable: {e}");
                Vec::new()
            },
        },
        Err(e) => {
            eprintln!("Containers unavailable: {e}");
            Vec::new()
        },
    };

    print!("{}", render_status(&gateways, &containers, Utc::now()));
    Ok(())
}

pub(crate) fn render_status(
    gateways: &[(DaemonState, bool)],
    containers: &[WorkloadStatus],
    now: DateTime<Utc>,
) -> String {
    if gateways.is_empty() && containers.is_empty() {
        return "No managed gateways or containers found.\n".into();
    }
    let mut out = String::new();
    if !gateways.is_empty() {
        out.push_str("GATEWAYS\n");
        let rows: Vec<Vec<String>> = gateways
            .iter()
            .map(|(s, running)| {
                vec![
                    s.topology.clone(),
                    s.port.to_string(),
                    s.pid.to_string(),
                    if *running { "running" } else { "stopped" }.to_string(),
                    format_age(now, s.started_at),
                ]
            })
            .collect();
        render_table(&mut out, &["NAME", "PORT", "PID", "STATUS", "STARTED"], &rows);
    }
    if !containers.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("CONTAINERS\n");
        let rows: Vec<Vec<String>> = containers
            .iter()
            .map(|c| {
                vec![
                    c.id.chars().take(12).collect(),
                    c.container.clone(),
                    c.role.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
                    c.image.clone(),
                    c.state.to_string(),
                    c.status.clone(),
                ]
            })
            .collect();
        render_table(
            &mut out,
            &["ID", "NAME", "TYPE", "IMAGE", "STATE", "STATUS"],
            &rows,
        );
    }
    out
}

fn render_table(out: &mut String, headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }
    render_row(out, &widths, headers);
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        render_row(out, &widths, &cells);
    }
}

fn render_row(out: &mut String, widths: &[usize], cells: &[&str]) {
    let last = cells.len().saturating_sub(1);
    let mut rendered = String::new();
    for (i, (cell, w)) in cells.iter().zip(widths).enumerate() {
        if i == last {
            rendered.push_str(cell);
        } else {
            let _ = write!(rendered, "{cell:<w$}   ");
        }
    }
    out.push_str(rendered.trim_end());
    out.push('\n');
}

/// "12 seconds ago", "1 minute ago", ...
pub(crate) fn format_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let (value, unit) = match secs {
        s if s < 60 => (s, "second"),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s => (s / 86_400, "day"),
    };
    let plural = if value == 1 { "" } else { "s" };
    format!("{value} {unit}{plural} ago")
}
