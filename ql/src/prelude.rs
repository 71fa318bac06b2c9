use std::fmt::{Display, Formatter};
use std::rc::Rc;

use anyhow::Result;

/// Data type we use to address an entry of the action catalog.
pub type ActionIndex = usize;

/// Learning environment, modeling the world of a learning agent
pub trait Environment {
    /// State representation - what the agent gets to see after each step
    type S;

    /// Number of possible actions; valid action indices are `0..action_space()`
    fn action_space(&self) -> usize;

    /// Starts a new episode and returns the initial state
    fn reset(&mut self) -> Result<Rc<Self::S>>;

    /// Performs one time/action-step.
    ///
    /// Applies the given `action` to the environment and returns:
    ///   - next state
    ///   - immediate reward earned during performing that step
    ///   - done flag (e.g. game ended)
    ///
    /// An `Err` is reserved for process level failures (e.g. the source of the state is gone).
    fn step(
        &mut self,
        action: ActionIndex,
    ) -> Result<(Rc<Self::S>, f32, bool)>;

    /// Releases everything the environment holds on the outside world.
    /// Called once when training ends - regardless of how it ends.
    fn close(&mut self) -> Result<()> { Ok(()) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QlError {
    /// Fewer stored elements than requested
    InsufficientData { requested: usize, available: usize },
    InvalidAction { action: ActionIndex, action_space: usize },
    Model(String),
}

impl QlError {
    pub fn model(msg: impl Into<String>) -> Self { QlError::Model(msg.into()) }
}

impl Display for QlError {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            QlError::InsufficientData { requested, available } => {
                write!(f, "insufficient data: requested {} elements, but only {} available", requested, available)
            }
            QlError::InvalidAction { action, action_space } => {
                write!(f, "action {} out of range (0..{})", action, action_space)
            }
            QlError::Model(msg) => write!(f, "model error: {}", msg),
        }
    }
}

impl std::error::Error for QlError {}
