//! Command channel between a remote caller thread and the controller.

pub mod channel;

pub use channel::{channel, Call, Command, RemoteClient, RemoteEndpoint, Reply, Response};
