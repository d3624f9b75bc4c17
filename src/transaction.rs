//! Interface to the transaction layer.
//!
//! The transaction layer itself (retransmission timers, ACK/2xx matching,
//! transport selection) lives outside this crate. The dialog layer hands it
//! fully built responses over an unbounded channel; every 491/500 rejection
//! emitted by the sequence checks travels this path.

use rand::{distr::Alphanumeric, Rng};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Events emitted by the dialog layer for the transaction layer to act on.
#[derive(Debug)]
pub enum TransactionEvent {
    /// Send this response for the transaction matching its Via/CSeq.
    Respond(rsip::Response),
}

pub type TransactionEventSender = UnboundedSender<TransactionEvent>;
pub type TransactionEventReceiver = UnboundedReceiver<TransactionEvent>;

/// Generate a random tag value for To/From headers.
pub fn make_tag() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}
