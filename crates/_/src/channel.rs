use crate::{error::fatal, protocol::Frame, world::Rank};
use std::{
    collections::BTreeMap,
    fs::File,
    os::fd::{FromRawFd, OwnedFd, RawFd},
};

/// Lowest descriptor number occupied by the launcher's channel mesh.
pub const FIRST_LINK_DESCRIPTOR: RawFd = 20;

/// Environment variable through which the launcher publishes the group size.
pub const SIZE_ENV: &str = "TROUPE_SIZE";

/// Environment variable through which the launcher publishes the rank of
/// the process with the given pid.
pub fn rank_env(pid: u32) -> String {
    format!("TROUPE_RANK_{pid}")
}

/// Descriptor at which the read end of the `sender -> receiver` channel is
/// installed by the launcher; the matching write end sits at the next (odd)
/// descriptor.
pub fn link_descriptor(world_size: usize, receiver: Rank, sender: Rank) -> RawFd {
    FIRST_LINK_DESCRIPTOR + 2 * (world_size * receiver.get() + sender.get()) as RawFd
}

/// One remote rank's pair of channel endpoints as seen by this process:
/// `inbound` carries the peer's frames to us, `outbound` carries ours to
/// the peer.
#[derive(Debug)]
pub struct Link {
    pub inbound: OwnedFd,
    pub outbound: OwnedFd,
}

/// The complete channel table of one group member: its rank, the group
/// size, and one [`Link`] per remote rank.
#[derive(Debug)]
pub struct Wiring {
    rank: Rank,
    size: usize,
    links: BTreeMap<Rank, Link>,
}

impl Wiring {
    /// Builds the wiring from the launcher contract: group size and the
    /// pid-keyed rank from the environment, endpoints at the deterministic
    /// descriptors of [`link_descriptor`]. Aborts with a diagnostic when
    /// the contract is not met - there is nothing to fall back to.
    pub fn from_env() -> Self {
        let size = std::env::var(SIZE_ENV)
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or_else(|| fatal(format!("{SIZE_ENV} is missing or invalid")));
        let key = rank_env(std::process::id());
        let rank = std::env::var(&key)
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .map(Rank::new)
            .unwrap_or_else(|| fatal(format!("{key} is missing or invalid")));
        if rank.get() >= size {
            fatal(format!("{rank} is outside the group of {size}"));
        }
        let links = (0..size)
            .map(Rank::new)
            .filter(|peer| *peer != rank)
            .map(|peer| {
                let inbound = link_descriptor(size, rank, peer);
                let outbound = link_descriptor(size, peer, rank) + 1;
                let link = unsafe {
                    Link {
                        inbound: OwnedFd::from_raw_fd(inbound),
                        outbound: OwnedFd::from_raw_fd(outbound),
                    }
                };
                (peer, link)
            })
            .collect();
        tracing::event!(
            target: "troupe::channel",
            tracing::Level::TRACE,
            "Wiring claimed from environment: {} of {} members",
            rank,
            size,
        );
        Self { rank, size, links }
    }

    /// Assembles wiring from explicit endpoints, bypassing the launcher
    /// contract; `links` must hold exactly one entry per remote rank.
    pub fn assemble(rank: Rank, size: usize, links: BTreeMap<Rank, Link>) -> Self {
        assert!(size > 0, "empty group");
        assert!(rank.get() < size, "{rank} is outside the group of {size}");
        assert!(
            !links.contains_key(&rank),
            "{rank} must not be linked to itself"
        );
        assert_eq!(
            links.len(),
            size - 1,
            "expected one link per remote rank of {rank}"
        );
        assert!(
            links.keys().all(|peer| peer.get() < size),
            "link to a rank outside the group of {size}"
        );
        Self { rank, size, links }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Splits the table into per-peer transport halves: readers for the
    /// receiver workers, writers for the user thread.
    pub(crate) fn into_endpoints(
        self,
    ) -> (
        Rank,
        usize,
        BTreeMap<Rank, LinkReader>,
        BTreeMap<Rank, LinkWriter>,
    ) {
        let mut readers = BTreeMap::new();
        let mut writers = BTreeMap::new();
        for (peer, link) in self.links {
            readers.insert(peer, LinkReader {
                peer,
                file: File::from(link.inbound),
            });
            writers.insert(peer, LinkWriter {
                peer,
                file: File::from(link.outbound),
            });
        }
        (self.rank, self.size, readers, writers)
    }
}

/// Read half of a link, owned by the peer's receiver worker. Frame reads
/// block until the whole frame arrived; any failure means the peer's write
/// end is gone.
#[derive(Debug)]
pub(crate) struct LinkReader {
    peer: Rank,
    file: File,
}

impl LinkReader {
    pub fn peer(&self) -> Rank {
        self.peer
    }

    /// Pulls the next whole frame, or `None` once the peer closed.
    pub fn pull(&mut self) -> Option<Frame> {
        match Frame::read(&mut self.file) {
            Ok(frame) => Some(frame),
            Err(err) => {
                tracing::event!(
                    target: "troupe::channel",
                    tracing::Level::TRACE,
                    "Inbound link from {} closed: {}",
                    self.peer,
                    err,
                );
                None
            }
        }
    }
}

/// Write half of a link, shared by the user thread's send paths. Frames
/// are written whole; any failure means the peer's read end is gone.
#[derive(Debug)]
pub(crate) struct LinkWriter {
    peer: Rank,
    file: File,
}

impl LinkWriter {
    /// Posts one frame; `false` when the remote already finished.
    pub fn post(&self, frame: &Frame) -> bool {
        match frame.write(&mut &self.file) {
            Ok(()) => true,
            Err(err) => {
                tracing::event!(
                    target: "troupe::channel",
                    tracing::Level::TRACE,
                    "Outbound link to {} closed: {}",
                    self.peer,
                    err,
                );
                false
            }
        }
    }
}
