//! the secure-session Server, its Connection type, the resumption ticket
//! table, and the process-boundary traits a host implements to run them

pub mod connection;
pub mod server;
pub mod ticket;
pub mod transport;
