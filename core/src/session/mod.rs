//! Client connections and the registry that tracks them

pub mod connection;
pub mod registry;

pub use connection::{Attachment, Connection, ConnectionEvent, ConnectionState};
pub use registry::ConnectionRegistry;
