//! Agreement on failed cluster members.
//!
//! When a node loses a peer it opens an arbitration round: the [MeshArbiter] broadcasts what it
//! knows, gathers everybody else's reports and feeds them to an [AgreementSeeker], which decides
//! when every surviving node holds consistent evidence and which nodes must be evicted.
mod aide;
mod arbiter;
mod constants;
mod discard;
mod seeker;
mod strategy;

pub use aide::MeshAide;
pub use arbiter::{ArbiterConfig, MeshArbiter};
pub use constants::*;
pub use discard::Discard;
pub use seeker::AgreementSeeker;
pub use strategy::ArbitrationStrategy;

use crate::mailbox;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The mailbox became unusable while a round was open.
    Mailbox(mailbox::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::convert::From<mailbox::Error> for Error {
    fn from(error: mailbox::Error) -> Self {
        Error::Mailbox(error)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
