use crate::{
    channel::LinkReader,
    error::fatal,
    protocol::{Frame, NO_PAYLOAD, Tag},
    store::{Message, PeerWait, Shared, State, WaitSlot},
    world::Rank,
};
use std::{
    sync::Arc,
    thread::{Builder, JoinHandle},
};

/// Spawns the receiver worker for one remote peer. The worker owns the
/// inbound half of the peer's link, blocks on it outside the lock, and
/// classifies every arrived frame under it; it stops once the peer's write
/// end closes.
pub(crate) fn spawn(rank: Rank, reader: LinkReader, shared: Arc<Shared>) -> JoinHandle<()> {
    let peer = reader.peer();
    Builder::new()
        .name(format!("Receiver {peer}"))
        .spawn(move || run(rank, reader, &shared))
        .unwrap_or_else(|err| fatal(format!("failed to spawn receiver worker for {peer}: {err}")))
}

fn run(rank: Rank, mut reader: LinkReader, shared: &Shared) {
    let peer = reader.peer();
    tracing::event!(
        target: "troupe::worker",
        tracing::Level::TRACE,
        "Receiver worker for {} started at {}",
        peer,
        rank,
    );
    loop {
        let Some(frame) = reader.pull() else {
            let mut state = shared.lock();
            state.peer_mut(peer).closed = true;
            if state.slot.is_waiting_on(peer) {
                shared.notify();
            }
            break;
        };
        let mut state = shared.lock();
        match frame {
            Frame::Waiting { count, tag } => {
                // An advertisement matched by one of our outstanding sends
                // resolves itself; only unmatched ones are recorded.
                if !state.has_pending(peer, count, tag) {
                    state
                        .peer_mut(peer)
                        .advertised
                        .push_back(PeerWait { count, tag });
                    if state.slot.is_waiting_on(peer) {
                        state.slot = WaitSlot::Deadlocked;
                        shared.notify();
                    }
                }
            }
            Frame::Received { count, tag } => {
                state.drop_pending(peer, count, tag);
            }
            Frame::Deadlock => {
                tracing::event!(
                    target: "troupe::worker",
                    tracing::Level::TRACE,
                    "{} concluded a deadlock against {}",
                    peer,
                    rank,
                );
                state.slot = WaitSlot::Deadlocked;
                // Placeholder entry so the receive pops symmetrically with
                // the side that concluded first.
                state.peer_mut(peer).advertised.push_back(PeerWait {
                    count: NO_PAYLOAD,
                    tag: Tag::DEADLOCK,
                });
                shared.notify();
            }
            Frame::Payload { tag, data } => {
                let message = Message {
                    tag,
                    count: data.len() as i64,
                    source: peer,
                    data: Some(data),
                };
                deliver(shared, &mut state, message);
            }
            Frame::NoMessage => {
                let message = Message {
                    tag: Tag::NO_MESSAGE,
                    count: NO_PAYLOAD,
                    source: peer,
                    data: None,
                };
                deliver(shared, &mut state, message);
            }
        }
    }
    tracing::event!(
        target: "troupe::worker",
        tracing::Level::TRACE,
        "Receiver worker for {} stopped at {}",
        peer,
        rank,
    );
}

fn deliver(shared: &Shared, state: &mut State, message: Message) {
    let wanted = state.slot.wants(&message);
    let source = message.source;
    state.peer_mut(source).inbound.push_back(message);
    if wanted {
        state.slot = WaitSlot::Delivered;
        shared.notify();
    }
}
