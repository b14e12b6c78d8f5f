//! Plain-text rendering of the published monitor state

use serde::Serialize;

use crate::core::state::{MonitorState, RuntimeStatus, StatusTone};
use crate::integrations::runtime::ContainerRecord;

fn status_icon(status: RuntimeStatus) -> &'static str {
    match status.tone() {
        StatusTone::Success => "●",
        StatusTone::Neutral => "○",
        StatusTone::Failure => "✗",
    }
}

/// Status line followed by the container table
pub fn render_state(state: &MonitorState) -> String {
    let mut out = format!(
        "{} {}  (updated {})\n",
        status_icon(state.status),
        state.status,
        state.last_updated.format("%H:%M:%S")
    );

    if state.is_operating {
        out.push_str("  operation in progress...\n");
    }

    match state.status {
        RuntimeStatus::Error => {
            out.push_str("  runtime could not be queried; run `berth status` to retry\n");
        }
        _ if state.resolved_path.is_none() => {
            out.push_str("  container executable not found\n");
        }
        _ => out.push_str(&render_containers(&state.containers)),
    }

    out
}

pub fn render_containers(containers: &[ContainerRecord]) -> String {
    if containers.is_empty() {
        return "No containers found\n".to_string();
    }

    let mut out = format!("{:<20} {:<25} {:<12} PORTS\n", "NAME", "IMAGE", "STATUS");
    out.push_str(&"-".repeat(72));
    out.push('\n');

    for container in containers {
        out.push_str(&format!(
            "{:<20} {:<25} {:<12} {}\n",
            truncate(&container.name, 18),
            truncate(container.image.as_deref().unwrap_or("-"), 23),
            truncate(&container.status, 12),
            container.ports.as_deref().unwrap_or("")
        ));
    }

    out
}

#[derive(Serialize)]
struct StatusReport<'a> {
    status: RuntimeStatus,
    last_updated: chrono::DateTime<chrono::Utc>,
    executable: Option<&'a std::path::Path>,
    containers: &'a [ContainerRecord],
}

pub fn render_json(state: &MonitorState) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&StatusReport {
        status: state.status,
        last_updated: state.last_updated,
        executable: state.resolved_path.as_deref(),
        containers: &state.containers,
    })
}

fn truncate(s: &str, max_len: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_len {
        s.to_string()
    } else if max_len > 3 {
        format!("{}...", s.chars().take(max_len - 3).collect::<String>())
    } else {
        s.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn running(containers: Vec<ContainerRecord>) -> MonitorState {
        let mut state = MonitorState::new(Some(PathBuf::from("/usr/local/bin/container")));
        state.status = RuntimeStatus::Running;
        state.containers = containers;
        state
    }

    #[test]
    fn truncates_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-container-name", 10), "a-very-...");
        assert_eq!(truncate("abcdef", 2), "ab");
    }

    #[test]
    fn renders_table_rows() {
        let state = running(vec![ContainerRecord::new("web", "running")
            .with_image(Some("nginx:latest".into()))
            .with_ports(Some("10.0.0.2".into()))]);

        let text = render_state(&state);

        assert!(text.starts_with("● Running"));
        assert!(text.contains("NAME"));
        let row = text.lines().last().unwrap();
        assert!(row.starts_with("web"));
        assert!(row.contains("nginx:latest"));
        assert!(row.ends_with("10.0.0.2"));
    }

    #[test]
    fn empty_and_missing_states() {
        assert!(render_state(&running(Vec::new())).contains("No containers found"));

        let missing = MonitorState::new(None);
        let text = render_state(&missing);
        assert!(text.starts_with("○ Stopped"));
        assert!(text.contains("executable not found"));

        let mut faulted = running(Vec::new());
        faulted.status = RuntimeStatus::Error;
        assert!(render_state(&faulted).starts_with("✗ Error"));
    }

    #[test]
    fn json_report_omits_identity() {
        let state = running(vec![ContainerRecord::new("web", "running")]);

        let json: serde_json::Value = serde_json::from_str(&render_json(&state).unwrap()).unwrap();

        assert_eq!(json["status"], "running");
        assert_eq!(json["executable"], "/usr/local/bin/container");
        assert_eq!(json["containers"][0]["name"], "web");
        assert!(json["containers"][0].get("identity").is_none());
        assert!(json["containers"][0].get("image").is_none());
    }
}
