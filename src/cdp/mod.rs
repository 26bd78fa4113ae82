//! CDP plumbing: wire parsing, connection multiplexing, typed messages

pub mod connection;
pub mod transport;
pub mod types;

pub use connection::{CdpClient, CdpConnection, CdpEvent};
pub use transport::CdpMessage;
