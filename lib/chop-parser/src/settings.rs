//! Rendering of installation settings into a ClickHouse configuration file
//!
//! Setting keys are `/`-separated paths, so `logger/level = debug` becomes
//! `<logger><level>debug</level></logger>` under the root element.

use chop_core::{Error, Result};
use std::collections::BTreeMap;

/// File name of the rendered settings inside the ConfigMap
pub const SETTINGS_FILE: &str = "chop-settings.xml";
/// Directory the server reads configuration overrides from
pub const CONFIG_DIR: &str = "/etc/clickhouse-server/config.d";

enum Node {
    Leaf(String),
    Branch(BTreeMap<String, Node>),
}

/// Render settings as XML. Fails when a path segment is not a valid
/// element name.
pub fn render_settings(settings: &BTreeMap<String, String>) -> Result<String> {
    let mut root = BTreeMap::new();
    for (path, value) in settings {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if let Some(bad) = segments.iter().find(|s| !is_element_name(s)) {
            return Err(Error::InvalidConfiguration(format!(
                "setting {:?}: {:?} is not a valid element name",
                path, bad
            )));
        }
        insert(&mut root, &segments, value);
    }

    let mut out = String::from("<yandex>\n");
    render(&root, 1, &mut out);
    out.push_str("</yandex>\n");
    Ok(out)
}

/// `[A-Za-z_][A-Za-z0-9._-]*`
fn is_element_name(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn insert(tree: &mut BTreeMap<String, Node>, path: &[&str], value: &str) {
    match path {
        [] => {}
        [leaf] => {
            tree.insert(leaf.to_string(), Node::Leaf(value.to_string()));
        }
        [head, rest @ ..] => {
            let node = tree
                .entry(head.to_string())
                .or_insert_with(|| Node::Branch(BTreeMap::new()));
            if let Node::Leaf(_) = node {
                // a nested path wins over a scalar at the same element
                *node = Node::Branch(BTreeMap::new());
            }
            if let Node::Branch(children) = node {
                insert(children, rest, value);
            }
        }
    }
}

fn render(tree: &BTreeMap<String, Node>, depth: usize, out: &mut String) {
    let indent = "    ".repeat(depth);
    for (name, node) in tree {
        match node {
            Node::Leaf(value) => {
                out.push_str(&format!("{indent}<{name}>{}</{name}>\n", escape(value)));
            }
            Node::Branch(children) => {
                out.push_str(&format!("{indent}<{name}>\n"));
                render(children, depth + 1, out);
                out.push_str(&format!("{indent}</{name}>\n"));
            }
        }
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
