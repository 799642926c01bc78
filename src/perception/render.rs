//! Text form of a snapshot as consumed by the planner.
//!
//! One line per node in pre-order:
//! `{indent}({index}) {class}{ "label"}{ [tags]}`. Changing indentation, tag
//! order or label composition changes what the planner sees.

use std::fmt::Write as _;

use crate::perception::types::{AppInfo, UiNode};

const INDENT: &str = "  ";

pub fn render_tree(root: &UiNode) -> String {
    let mut out = String::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        render_line(&mut out, node, depth);
        stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
    }
    out
}

fn render_line(out: &mut String, node: &UiNode, depth: usize) {
    out.push_str(&INDENT.repeat(depth));
    let _ = write!(out, "({}) {}", node.index, node.class_name);
    if let Some(label) = node.label() {
        let _ = write!(out, " \"{label}\"");
    }
    let tags = capability_tags(node);
    if !tags.is_empty() {
        let _ = write!(out, " [{}]", tags.join(", "));
    }
    out.push('\n');
}

fn capability_tags(node: &UiNode) -> Vec<&'static str> {
    let mut tags = Vec::with_capacity(4);
    if node.clickable {
        tags.push("clickable");
    }
    if node.scrollable {
        tags.push("scrollable");
    }
    if node.editable {
        tags.push("editable");
    }
    if node.checkable {
        tags.push(if node.checked { "checked" } else { "unchecked" });
    }
    tags
}

pub fn render_apps(apps: &[AppInfo]) -> String {
    let mut out = String::from("Installed apps:\n");
    for app in apps {
        let _ = writeln!(out, "- {} ({})", app.label, app.id);
    }
    out
}
