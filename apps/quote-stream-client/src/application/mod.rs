//! Application Layer - Port definitions.
//!
//! The client core talks to the outside world only through the ports
//! declared here.

/// Interfaces for the bidirectional message transport.
pub mod ports;
