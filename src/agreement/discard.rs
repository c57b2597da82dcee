use crate::colored::Colorize;
use crate::message::FaultObservation;

use tracing::debug;

/// Outcome of screening a fault observation before it reaches a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// The faulting node is not a member.
    Unknown,
    /// The faulting node was already evicted.
    AlreadyFailed,
    /// The faulting node is already suspected with at least as strong evidence.
    ReportedWitnessed,
    /// A node cannot witness its own loss.
    SelfWitnessed,
    /// The observation must be processed.
    DoNot,
}

impl Discard {
    pub fn is_processable(&self) -> bool {
        *self == Discard::DoNot
    }

    pub fn log(&self, fault: &FaultObservation) {
        match self {
            Discard::DoNot => (),
            Discard::Unknown => {
                debug!("{} ignoring {}: not a member", "[arbiter]".cyan(), fault)
            }
            Discard::AlreadyFailed => {
                debug!("{} ignoring {}: already evicted", "[arbiter]".cyan(), fault)
            }
            Discard::ReportedWitnessed => {
                debug!("{} ignoring {}: already suspected", "[arbiter]".cyan(), fault)
            }
            Discard::SelfWitnessed => {
                debug!("{} ignoring {}: reports the local node", "[arbiter]".cyan(), fault)
            }
        }
    }
}
