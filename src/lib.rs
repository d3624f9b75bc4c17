//! SIP dialog layer for building SIP user agents.
//!
//! This crate implements the dialog layer described in RFC 3261 section 12:
//! dialog identification, early/confirmed state tracking, CSeq ordering of
//! in-dialog requests, route set management and in-dialog request
//! construction. Message parsing ([`rsip`]), the transaction layer
//! (retransmission timers, ACK/2xx matching) and the transport sockets are
//! external collaborators reached through narrow channel interfaces, see
//! [`transaction`] and [`dialog::dialog::DialogEvent`].

pub mod dialog;
pub mod rsip_ext;
pub mod transaction;

pub use dialog::dialog::{Dialog, DialogEvent, DialogState};
pub use dialog::dialog_layer::DialogLayer;
pub use dialog::{DialogId, DialogRole};

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Error(String),
    MissingContact(String),
    SipMessageError(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Error(e) => write!(f, "{}", e),
            Error::MissingContact(e) => write!(f, "missing Contact header: {}", e),
            Error::SipMessageError(e) => write!(f, "sip message error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<rsip::Error> for Error {
    fn from(e: rsip::Error) -> Self {
        Error::SipMessageError(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::Error(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
