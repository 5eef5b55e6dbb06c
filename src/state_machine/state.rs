use std::fmt;

use serde::{Deserialize, Serialize};

/// The four states of a photo's processing lifecycle.
///
/// Each item flows through: UPLOADED → PROCESSING → DONE | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemState {
    Uploaded,
    Processing,
    Done,
    Failed,
}

impl ItemState {
    /// Every state, in lifecycle order.
    pub const ALL: [ItemState; 4] = [
        ItemState::Uploaded,
        ItemState::Processing,
        ItemState::Done,
        ItemState::Failed,
    ];

    /// `Done` and `Failed` never advance again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Done | ItemState::Failed)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Uploaded => write!(f, "UPLOADED"),
            ItemState::Processing => write!(f, "PROCESSING"),
            ItemState::Done => write!(f, "DONE"),
            ItemState::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for ItemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UPLOADED" => Ok(ItemState::Uploaded),
            "PROCESSING" => Ok(ItemState::Processing),
            "DONE" => Ok(ItemState::Done),
            "FAILED" => Ok(ItemState::Failed),
            other => Err(format!("unknown item state: {other}")),
        }
    }
}

/// How a finished processing run turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingOutcome {
    Success,
    Failure,
}

/// A transition the engine may request for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Pick up an uploaded item.
    Start,
    /// Finish a processing item with the given outcome.
    Finish(ProcessingOutcome),
}

/// The automatic edges of the lifecycle.
pub struct StateMachine;

impl StateMachine {
    /// Compute the state reached by applying `transition` to `current`.
    ///
    /// Returns `None` when the edge does not exist: `Start` is only valid from
    /// `Uploaded`, `Finish` only from `Processing`, and terminal states accept
    /// nothing.
    pub fn next(current: ItemState, transition: Transition) -> Option<ItemState> {
        match (current, transition) {
            (ItemState::Uploaded, Transition::Start) => Some(ItemState::Processing),
            (ItemState::Processing, Transition::Finish(ProcessingOutcome::Success)) => {
                Some(ItemState::Done)
            }
            (ItemState::Processing, Transition::Finish(ProcessingOutcome::Failure)) => {
                Some(ItemState::Failed)
            }
            _ => None,
        }
    }

    /// Whether the engine could ever move an item from `from` to `to`.
    pub fn is_valid_edge(from: ItemState, to: ItemState) -> bool {
        [
            Transition::Start,
            Transition::Finish(ProcessingOutcome::Success),
            Transition::Finish(ProcessingOutcome::Failure),
        ]
        .into_iter()
        .any(|t| Self::next(from, t) == Some(to))
    }
}
