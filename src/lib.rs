#[macro_use]
extern crate serde_derive;
#[macro_use(Message, MessageResponse)]
extern crate actix_derive;
extern crate colored;

pub mod agreement;
pub mod integration_test;
pub mod mailbox;
pub mod message;
pub mod node;
pub mod node_id;
pub mod settings;
pub mod sim;
pub mod view;

#[derive(Debug)]
pub enum Error {
    Actix(actix::MailboxError),

    // mesh errors
    Mailbox(mailbox::Error),
    Agreement(agreement::Error),

    /// Wire encoding or decoding failed
    Codec(bincode::Error),
    /// Settings could not be loaded
    Config(config::ConfigError),

    /// Error caused by converting from a `String` to a `NodeId`
    TryFromStringError,
    /// Membership in the settings does not contain the local node
    NotAMember,

    JoinError,
}

impl std::error::Error for Error {}

impl std::convert::From<actix::MailboxError> for Error {
    fn from(error: actix::MailboxError) -> Self {
        Error::Actix(error)
    }
}

impl std::convert::From<mailbox::Error> for Error {
    fn from(error: mailbox::Error) -> Self {
        Error::Mailbox(error)
    }
}

impl std::convert::From<agreement::Error> for Error {
    fn from(error: agreement::Error) -> Self {
        match error {
            agreement::Error::Mailbox(err) => Error::Mailbox(err),
        }
    }
}

impl std::convert::From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Codec(error)
    }
}

impl std::convert::From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
