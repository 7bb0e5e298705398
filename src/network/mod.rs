//! Peer-to-peer networking: the TCP mesh and the tangle sync protocol

pub mod message;
pub mod peer;
pub mod sync;

pub use message::{Envelope, Message};
pub use peer::{ConnectionListener, MessageHandler, PeerNetwork};
pub use sync::NetworkedTangle;
