//! A Go-Back-N style reliable transport built over an unreliable, host-supplied
//! datagram service.
//!
//! This crate owns exactly the protocol state machine: segment codec,
//! send/receive windows, cumulative ACK, retransmit timer, and the four-way
//! FIN teardown. It never opens a socket, reads stdin, or schedules a timer
//! itself — that ambient plumbing belongs to an [`Adapter`] implementation
//! supplied by the host (see [`demo::UdpAdapter`] for a runnable example).
//!
//! Congestion control, selective ACK, path MTU discovery, and out-of-order
//! reassembly are explicitly out of scope.

mod adapter;
mod config;
mod connection;
pub mod demo;
mod error;
mod recv;
mod registry;
mod send;
mod teardown;
mod timer;
mod wire;

pub use adapter::{Adapter, InputEvent};
pub use config::Config;
pub use error::Error;
pub use registry::{ConnId, Registry};
pub use wire::{Flags, Segment, HEADER_SIZE};
