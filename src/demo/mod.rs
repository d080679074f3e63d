//! Reference, non-production adapters (§6). These are not part of the
//! core protocol and carry no correctness guarantees beyond making the demo
//! binaries in `bin/` run; the core never depends on anything in this module.

mod udp_adapter;

pub use udp_adapter::UdpAdapter;
