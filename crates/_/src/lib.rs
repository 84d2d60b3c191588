//! Troupe is a message-passing library for a fixed-size group of cooperating
//! processes on a single host, collectively executing one parallel program.
//!
//! Key concepts:
//! - World: the per-process runtime value embodying the group - rank, size,
//!   channel endpoints, message store and receiver workers.
//! - Ranks: dense integer identifiers of the group members, assigned by the
//!   launcher.
//! - Links: pre-established byte channels, one per ordered pair of ranks.
//!   There is no network and no dynamic membership.
//! - Frames: the raw units of traffic on a link - a fixed header plus an
//!   optional payload, covering both user messages and control traffic.
//! - Tags: non-negative message classes chosen by user code; the negative
//!   tag space is reserved for the runtime's control protocol.
//!
//! How typical communication works:
//! 1. The launcher (`troupe-launch`) wires a channel mesh between N fresh
//!    processes and publishes each process's rank through the environment.
//! 1. Each process calls [`world::World::init`], which claims its endpoints
//!    and spawns one receiver worker per remote rank. Workers buffer
//!    arrivals so receives may complete in any order relative to sends.
//! 1. User code exchanges byte payloads with [`world::World::send`] and
//!    [`world::World::recv`], and synchronises through the tree collectives
//!    (barrier, broadcast, reduce) layered on top of them.
//! 1. When a process calls [`world::World::finalize`], its write ends close;
//!    peers observe the closure and any receive aimed at the finished rank
//!    resolves with a distinct error instead of blocking forever.
//!
//! With deadlock detection enabled, two peers blocked on each other in
//! symmetric receives conclude the fact through a control-tag handshake and
//! both return an error instead of hanging.

pub mod channel;
pub mod error;
pub mod protocol;
pub mod world;

mod collective;
mod store;
mod worker;

pub mod third_party {
    pub use tracing;
}
