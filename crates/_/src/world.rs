use crate::{
    channel::{LinkWriter, Wiring},
    error::{Fault, fatal},
    protocol::{Frame, NO_PAYLOAD, ReduceOp, Tag},
    store::{PendingSend, Shared, WaitSlot},
    worker,
};
use std::{collections::BTreeMap, sync::Arc, thread::JoinHandle};

/// Identifier of a process in the group, in `[0, world_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(usize);

impl Rank {
    pub const fn new(rank: usize) -> Self {
        Self(rank)
    }

    pub const fn get(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#rank:{}", self.0)
    }
}

/// Behavior switches applied when a world is brought up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorldConfig {
    /// Track outstanding sends and advertised waits so that two peers
    /// blocked on each other in symmetric receives both learn about it.
    pub detect_deadlock: bool,
}

impl WorldConfig {
    pub fn detect_deadlock(mut self, value: bool) -> Self {
        self.detect_deadlock = value;
        self
    }
}

/// The per-process communication runtime: this process's rank and group
/// size, the write halves of its links, the shared message store, and one
/// receiver worker per remote rank.
///
/// A world's user interface is single-threaded: at most one receive is in
/// flight at a time, and calls never overlap.
pub struct World {
    rank: Rank,
    size: usize,
    detect_deadlock: bool,
    writers: BTreeMap<Rank, LinkWriter>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl World {
    /// Brings the world up under the launcher contract: wiring claimed
    /// from the environment and the inherited descriptor mesh. Must be
    /// called before any other operation.
    pub fn init(config: WorldConfig) -> Self {
        Self::assemble(Wiring::from_env(), config)
    }

    /// Brings the world up over explicitly assembled wiring. This is the
    /// entry point for embedders that perform their own descriptor
    /// handshake, and for in-process harnesses.
    pub fn assemble(wiring: Wiring, config: WorldConfig) -> Self {
        let (rank, size, readers, writers) = wiring.into_endpoints();
        let shared = Arc::new(Shared::new(rank, size));
        let workers = readers
            .into_values()
            .map(|reader| worker::spawn(rank, reader, shared.clone()))
            .collect();
        tracing::event!(
            target: "troupe::world",
            tracing::Level::TRACE,
            "World of {} brought up at {}, deadlock detection {}",
            size,
            rank,
            if config.detect_deadlock { "on" } else { "off" },
        );
        Self {
            rank,
            size,
            detect_deadlock: config.detect_deadlock,
            writers,
            shared,
            workers,
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tears the world down: closes the local write ends, which lets every
    /// peer observe the departure, then joins the receiver workers once
    /// the peers have closed theirs.
    pub fn finalize(mut self) {
        tracing::event!(
            target: "troupe::world",
            tracing::Level::TRACE,
            "World member {} finalizing",
            self.rank,
        );
        self.writers.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    /// Sends `data` to `destination` under `tag`. Blocks only on channel
    /// backpressure, never on the receiver's progress.
    pub fn send(&self, data: &[u8], destination: Rank, tag: Tag) -> Result<(), Fault> {
        self.post(
            destination,
            data.len() as i64,
            tag,
            &Frame::Payload {
                tag,
                data: data.to_vec(),
            },
        )
    }

    /// Receives one message from `source` into `buffer`, blocking until a
    /// message of exactly `buffer.len()` bytes whose tag satisfies `tag`
    /// arrives (or already sits buffered), the peer finishes, or a mutual
    /// deadlock is concluded.
    pub fn recv(&self, buffer: &mut [u8], source: Rank, tag: Tag) -> Result<(), Fault> {
        self.accept(Some(buffer), source, tag)
    }

    /// Validates `rank` as a remote peer and resolves its write half.
    fn writer(&self, rank: Rank) -> Result<&LinkWriter, Fault> {
        if rank.get() >= self.size {
            return Err(Fault::NoSuchRank(rank));
        }
        if rank == self.rank {
            return Err(Fault::SelfOp(rank));
        }
        Ok(&self.writers[&rank])
    }

    /// Frame send with the deadlock-mode bookkeeping of user tags: an
    /// advertised wait satisfied by this send is dropped at the buffer
    /// head, and the send itself is recorded until the peer acknowledges
    /// consumption. The channel write happens outside the lock.
    pub(crate) fn post(
        &self,
        destination: Rank,
        count: i64,
        tag: Tag,
        frame: &Frame,
    ) -> Result<(), Fault> {
        let writer = self.writer(destination)?;
        if self.detect_deadlock && tag.is_user() {
            let mut state = self.shared.lock();
            let peer = state.peer_mut(destination);
            if peer
                .advertised
                .front()
                .is_some_and(|wait| wait.count == count && wait.tag == tag)
            {
                peer.advertised.pop_front();
            }
            state.pending_sends.push_back(PendingSend {
                destination,
                count,
                tag,
            });
        }
        if writer.post(frame) {
            Ok(())
        } else {
            Err(Fault::RemoteFinished(destination))
        }
    }

    /// Receive core shared by [`World::recv`] and the collectives;
    /// `buffer` is `None` for the rendezvous-only traffic. For reduction
    /// tags the received payload is folded into `buffer` elementwise
    /// instead of overwriting it.
    pub(crate) fn accept(
        &self,
        buffer: Option<&mut [u8]>,
        source: Rank,
        tag: Tag,
    ) -> Result<(), Fault> {
        let writer = self.writer(source)?;
        let count = buffer.as_ref().map_or(NO_PAYLOAD, |b| b.len() as i64);
        let mut state = self.shared.lock();

        let message = match state.take_matching(source, count, tag) {
            Some(message) => message,
            None => {
                state.slot = WaitSlot::Waiting { source, count, tag };
                if self.detect_deadlock && tag.is_user() {
                    // The peer advertising a user-tag wait for us while we
                    // are about to wait for it is the mutual-wait shape.
                    if state
                        .peer(source)
                        .advertised
                        .front()
                        .is_some_and(|wait| wait.tag.is_user())
                    {
                        state.slot = WaitSlot::Idle;
                        state.peer_mut(source).advertised.pop_front();
                        writer.post(&Frame::Deadlock);
                        tracing::event!(
                            target: "troupe::world",
                            tracing::Level::TRACE,
                            "{} concluded a deadlock against {}",
                            self.rank,
                            source,
                        );
                        return Err(Fault::DeadlockDetected(source));
                    }
                    if !writer.post(&Frame::Waiting { count, tag }) {
                        state.slot = WaitSlot::Idle;
                        return Err(Fault::RemoteFinished(source));
                    }
                }
                while matches!(state.slot, WaitSlot::Waiting { .. }) && !state.peer(source).closed {
                    state = self.shared.wait(state);
                }
                match state.slot {
                    WaitSlot::Deadlocked => {
                        state.slot = WaitSlot::Idle;
                        state.peer_mut(source).advertised.pop_front();
                        return Err(Fault::DeadlockDetected(source));
                    }
                    WaitSlot::Waiting { .. } => {
                        // Peer closed with nothing delivered.
                        state.slot = WaitSlot::Idle;
                        return Err(Fault::RemoteFinished(source));
                    }
                    _ => {}
                }
                state.slot = WaitSlot::Idle;
                state
                    .take_matching(source, count, tag)
                    .unwrap_or_else(|| fatal("delivered message vanished from the store"))
            }
        };
        if self.detect_deadlock && tag.is_user() {
            writer.post(&Frame::Received { count, tag });
        }
        drop(state);

        if let Some(buffer) = buffer
            && let Some(data) = &message.data
        {
            if let Some(op) = ReduceOp::from_tag(tag) {
                op.apply(data, buffer);
            } else {
                buffer.copy_from_slice(data);
            }
        }
        Ok(())
    }
}
