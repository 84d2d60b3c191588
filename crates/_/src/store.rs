use crate::{
    error::fatal,
    protocol::Tag,
    world::Rank,
};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Condvar, Mutex, MutexGuard},
};

/// A fully-received inbound message buffered until a matching receive.
/// The payload is owned exclusively; it is moved out on a successful match
/// and dropped with the store otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Message {
    pub tag: Tag,
    pub count: i64,
    pub source: Rank,
    pub data: Option<Vec<u8>>,
}

impl Message {
    /// Whether this message satisfies a receive asking for `(count, tag)`.
    /// The wildcard admits any non-reserved tag; reserved tags match only
    /// exactly.
    pub fn admits(&self, count: i64, tag: Tag) -> bool {
        self.count == count
            && if tag == Tag::ANY {
                self.tag.is_user()
            } else {
                self.tag == tag
            }
    }
}

/// A user-tag send whose consumption has not been acknowledged yet.
/// Tracked only in deadlock-detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingSend {
    pub destination: Rank,
    pub count: i64,
    pub tag: Tag,
}

impl PendingSend {
    /// Whether this record satisfies a peer's advertised wait or receipt
    /// of `(count, tag)`; a wildcard pattern admits any tag.
    pub fn satisfies(&self, peer: Rank, count: i64, tag: Tag) -> bool {
        self.destination == peer && self.count == count && (tag == Tag::ANY || self.tag == tag)
    }
}

/// A receive a peer advertised it is blocked on, waiting for us.
/// Tracked only in deadlock-detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PeerWait {
    pub count: i64,
    pub tag: Tag,
}

/// Everything this process buffers about one remote rank. `closed` flips
/// false to true exactly once, when the peer's write end goes away.
#[derive(Debug, Default)]
pub(crate) struct PeerState {
    pub inbound: VecDeque<Message>,
    pub advertised: VecDeque<PeerWait>,
    pub closed: bool,
}

/// The single rendezvous slot through which a blocked receive and the
/// receiver workers meet. Only the user thread arms it; only workers write
/// the terminal states; the condvar is signalled on every terminal
/// transition.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitSlot {
    #[default]
    Idle,
    Waiting {
        source: Rank,
        count: i64,
        tag: Tag,
    },
    Delivered,
    Deadlocked,
}

impl WaitSlot {
    pub fn is_waiting_on(&self, peer: Rank) -> bool {
        matches!(self, WaitSlot::Waiting { source, .. } if *source == peer)
    }

    /// Whether an arrival from its source satisfies the armed receive.
    pub fn wants(&self, message: &Message) -> bool {
        matches!(
            self,
            WaitSlot::Waiting { source, count, tag }
                if *source == message.source && message.admits(*count, *tag)
        )
    }
}

/// Shared state guarded by the world's single mutex.
#[derive(Debug)]
pub(crate) struct State {
    pub peers: BTreeMap<Rank, PeerState>,
    pub pending_sends: VecDeque<PendingSend>,
    pub slot: WaitSlot,
}

impl State {
    pub fn new(rank: Rank, size: usize) -> Self {
        Self {
            peers: (0..size)
                .map(Rank::new)
                .filter(|peer| *peer != rank)
                .map(|peer| (peer, PeerState::default()))
                .collect(),
            pending_sends: VecDeque::new(),
            slot: WaitSlot::Idle,
        }
    }

    pub fn peer(&self, rank: Rank) -> &PeerState {
        self.peers
            .get(&rank)
            .unwrap_or_else(|| fatal(format!("no peer state for {rank}")))
    }

    pub fn peer_mut(&mut self, rank: Rank) -> &mut PeerState {
        self.peers
            .get_mut(&rank)
            .unwrap_or_else(|| fatal(format!("no peer state for {rank}")))
    }

    /// Removes and returns the earliest buffered message from `source`
    /// satisfying `(count, tag)`.
    pub fn take_matching(&mut self, source: Rank, count: i64, tag: Tag) -> Option<Message> {
        let inbound = &mut self.peer_mut(source).inbound;
        let index = inbound
            .iter()
            .position(|message| message.admits(count, tag))?;
        inbound.remove(index)
    }

    pub fn has_pending(&self, peer: Rank, count: i64, tag: Tag) -> bool {
        self.pending_sends
            .iter()
            .any(|pending| pending.satisfies(peer, count, tag))
    }

    /// Drops the earliest pending send satisfying the peer's receipt.
    pub fn drop_pending(&mut self, peer: Rank, count: i64, tag: Tag) {
        if let Some(index) = self
            .pending_sends
            .iter()
            .position(|pending| pending.satisfies(peer, count, tag))
        {
            self.pending_sends.remove(index);
        }
    }
}

/// The mutex/condvar pair every member thread of a world shares. The wait
/// surface is a single slot, so one lock covers all buffers.
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

impl Shared {
    pub fn new(rank: Rank, size: usize) -> Self {
        Self {
            state: Mutex::new(State::new(rank, size)),
            wakeup: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|_| fatal("world state mutex poisoned"))
    }

    pub fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.wakeup
            .wait(guard)
            .unwrap_or_else(|_| fatal("world state mutex poisoned"))
    }

    pub fn notify(&self) {
        self.wakeup.notify_one();
    }
}
