use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, Error};

/// Logical input signals the agent can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    /// focused (slow) movement
    Shift,
    /// shoot; also confirms menu entries
    Z,
    /// bomb
    X,
    Escape,
}

impl Key {
    pub const ALL: [Key; 8] = [Key::Up, Key::Down, Key::Left, Key::Right, Key::Shift, Key::Z, Key::X, Key::Escape];

    pub fn name(&self) -> &'static str {
        match self {
            Key::Up => "up",
            Key::Down => "down",
            Key::Left => "left",
            Key::Right => "right",
            Key::Shift => "shift",
            Key::Z => "z",
            Key::X => "x",
            Key::Escape => "escape",
        }
    }
}

impl Display for Key {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Key::ALL
            .into_iter()
            .find(|k| k.name() == lower)
            .or(match lower.as_str() {
                "esc" => Some(Key::Escape),
                _ => None,
            })
            .ok_or_else(|| anyhow!("unknown key '{}'", s))
    }
}

/// What the input device was told to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Press(Key),
    Release(Key),
}

impl Display for InputEvent {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            InputEvent::Press(k) => write!(f, "press({})", k),
            InputEvent::Release(k) => write!(f, "release({})", k),
        }
    }
}
