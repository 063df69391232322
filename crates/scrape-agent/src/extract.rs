//! Field extraction from the two query responses.
//!
//! Absent nodes yield `None`; the sentinel is rendered only at presentation
//! boundaries. The timeline deliberately reads two different edges: the first
//! edge supplies the last action, while the first edge carrying a non-empty
//! message supplies the last message. Those can differ when the newest
//! activity is a state change without a comment.

use serde_json::Value;

/// Fields drawn from the metadata query.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MetadataFields {
    pub status: Option<String>,
    pub researcher: Option<String>,
    pub title: Option<String>,
    pub program: Option<String>,
}

/// Fields drawn from the timeline query.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TimelineFields {
    pub last_action: Option<String>,
    pub last_action_author: Option<String>,
    pub last_action_date: Option<String>,
    pub last_message: Option<String>,
    pub last_message_author: Option<String>,
    pub last_message_date: Option<String>,
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut node = value;
    for key in path {
        node = node.get(key)?;
    }
    node.as_str().map(str::to_string)
}

pub fn extract_metadata(json: &Value) -> MetadataFields {
    let node = json
        .pointer("/data/reports/edges/0/node")
        .unwrap_or(&Value::Null);
    MetadataFields {
        status: str_at(node, &["substate"]),
        researcher: str_at(node, &["reporter", "username"]),
        title: str_at(node, &["title"]),
        program: str_at(node, &["team", "name"]),
    }
}

pub fn extract_timeline(json: &Value) -> TimelineFields {
    let empty = Vec::new();
    let edges = json
        .pointer("/data/reports/nodes/0/activities/edges")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let first = edges.first().and_then(|e| e.get("node"));
    let message_node = edges
        .iter()
        .filter_map(|e| e.get("node"))
        .find(|node| {
            node.get("message")
                .and_then(Value::as_str)
                .map(|m| !m.trim().is_empty())
                .unwrap_or(false)
        });

    TimelineFields {
        last_action: first.and_then(|n| str_at(n, &["type"])),
        last_action_author: first.and_then(|n| str_at(n, &["actor", "username"])),
        last_action_date: first.and_then(|n| str_at(n, &["created_at"])),
        last_message: message_node.and_then(|n| str_at(n, &["message"])),
        last_message_author: message_node.and_then(|n| str_at(n, &["actor", "username"])),
        last_message_date: message_node.and_then(|n| str_at(n, &["created_at"])),
    }
}
