#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: transport seam, loopback transport, events, node controller.

pub mod events;
pub mod loopback;
pub mod node;
pub mod transport;
