use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::executor::ports::ScrollVerb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn verb(self) -> ScrollVerb {
        match self {
            ScrollDirection::Up | ScrollDirection::Left => ScrollVerb::Backward,
            ScrollDirection::Down | ScrollDirection::Right => ScrollVerb::Forward,
        }
    }
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScrollDirection::Up => "UP",
            ScrollDirection::Down => "DOWN",
            ScrollDirection::Left => "LEFT",
            ScrollDirection::Right => "RIGHT",
        };
        f.write_str(s)
    }
}

impl FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" => Ok(ScrollDirection::Up),
            "DOWN" => Ok(ScrollDirection::Down),
            "LEFT" => Ok(ScrollDirection::Left),
            "RIGHT" => Ok(ScrollDirection::Right),
            _ => Err(format!(
                "Invalid direction '{s}'. Use UP, DOWN, LEFT, or RIGHT."
            )),
        }
    }
}

/// One device command issued by the planner and consumed once by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Click { index: usize },
    Scroll { index: usize, direction: ScrollDirection },
    Type { index: usize, text: String },
    GoBack,
    LaunchApp { app_id: String },
    ListApps,
}

impl Command {
    /// Node index the command targets, if it targets one.
    pub fn target_index(&self) -> Option<usize> {
        match self {
            Command::Click { index }
            | Command::Scroll { index, .. }
            | Command::Type { index, .. } => Some(*index),
            Command::GoBack | Command::LaunchApp { .. } | Command::ListApps => None,
        }
    }

    /// Whether a successful run is expected to change what is on screen.
    pub fn changes_screen(&self) -> bool {
        !matches!(self, Command::ListApps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_maps_to_scroll_verb() {
        assert_eq!(ScrollDirection::Up.verb(), ScrollVerb::Backward);
        assert_eq!(ScrollDirection::Left.verb(), ScrollVerb::Backward);
        assert_eq!(ScrollDirection::Down.verb(), ScrollVerb::Forward);
        assert_eq!(ScrollDirection::Right.verb(), ScrollVerb::Forward);
    }

    #[test]
    fn direction_parsing_is_case_insensitive() {
        assert_eq!("down".parse::<ScrollDirection>(), Ok(ScrollDirection::Down));
        assert_eq!(" Left ".parse::<ScrollDirection>(), Ok(ScrollDirection::Left));
        assert_eq!(
            "sideways".parse::<ScrollDirection>(),
            Err("Invalid direction 'sideways'. Use UP, DOWN, LEFT, or RIGHT.".to_string())
        );
    }

    #[test]
    fn only_node_commands_have_targets() {
        assert_eq!(Command::Click { index: 4 }.target_index(), Some(4));
        assert_eq!(Command::GoBack.target_index(), None);
        assert!(!Command::ListApps.changes_screen());
        assert!(Command::LaunchApp { app_id: "x".into() }.changes_screen());
    }
}
