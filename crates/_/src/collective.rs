use crate::{
    error::Fault,
    protocol::{Frame, NO_PAYLOAD, ReduceOp, Tag},
    world::{Rank, World},
};
use smallvec::SmallVec;

/// Largest power of two not exceeding `rank`; zero for the root position.
const fn pow2_floor(rank: usize) -> usize {
    if rank == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - rank.leading_zeros())
    }
}

/// One process's position in the binomial collective tree. The tree is
/// always anchored at position zero; for a collective rooted elsewhere,
/// every participant remaps `0 <-> root` both when positioning itself and
/// when naming partners, so the shape stays fixed.
struct FanTree {
    rank: usize,
    size: usize,
    root: usize,
}

impl FanTree {
    fn new(world: &World, root: Rank) -> Self {
        Self {
            rank: world.rank().get(),
            size: world.size(),
            root: root.get(),
        }
    }

    fn remap(&self, rank: usize) -> usize {
        if rank == self.root {
            0
        } else if rank == 0 {
            self.root
        } else {
            rank
        }
    }

    fn parent(&self) -> Option<Rank> {
        let position = self.remap(self.rank);
        (position != 0).then(|| Rank::new(self.remap(position - pow2_floor(position))))
    }

    /// Children in ascending position order; the root fans out to
    /// 1, 2, 4, ..., an inner position `p` to `p + 2*pow2_floor(p)*2^k`.
    fn children(&self) -> SmallVec<[Rank; 4]> {
        let position = self.remap(self.rank);
        let mut stride = if position == 0 {
            1
        } else {
            2 * pow2_floor(position)
        };
        let mut child = position + stride;
        let mut children = SmallVec::new();
        while child < self.size {
            children.push(Rank::new(self.remap(child)));
            child += stride;
            stride *= 2;
        }
        children
    }
}

impl World {
    /// Blocks until every rank of the group has entered the barrier; the
    /// completion of the downward phase is the release.
    pub fn barrier(&self) -> Result<(), Fault> {
        let tree = FanTree::new(self, Rank::new(0));
        self.ascend(None, Tag::NO_MESSAGE, &tree)?;
        self.descend(None, Tag::NO_MESSAGE, &tree)
    }

    /// Distributes the root's `data` to every rank. The upward phase is a
    /// rendezvous ensuring all participants entered; the downward phase
    /// carries the payload from the root outward.
    pub fn broadcast(&self, data: &mut [u8], root: Rank) -> Result<(), Fault> {
        self.ensure_rank(root)?;
        let tree = FanTree::new(self, root);
        self.ascend(None, Tag::NO_MESSAGE, &tree)?;
        self.descend(Some(data), Tag::BROADCAST, &tree)
    }

    /// Folds every rank's `send_data` with `op`, elementwise over bytes,
    /// into the root's `recv_data`; other ranks' `recv_data` stays
    /// untouched. A final rendezvous phase synchronises completion so all
    /// ranks observe consistent return codes.
    pub fn reduce(
        &self,
        send_data: &[u8],
        recv_data: &mut [u8],
        op: ReduceOp,
        root: Rank,
    ) -> Result<(), Fault> {
        self.ensure_rank(root)?;
        let tree = FanTree::new(self, root);
        let mut scratch = send_data.to_vec();
        self.ascend(Some(&mut scratch), op.tag(), &tree)?;
        if self.rank() == root {
            recv_data.copy_from_slice(&scratch);
        }
        self.descend(None, Tag::NO_MESSAGE, &tree)
    }

    fn ensure_rank(&self, rank: Rank) -> Result<(), Fault> {
        if rank.get() >= self.size() {
            Err(Fault::NoSuchRank(rank))
        } else {
            Ok(())
        }
    }

    /// Upward phase: gather from every child, then report to the parent.
    /// Receives with a reduction tag fold the children's payloads into
    /// `data` on the way.
    fn ascend(&self, mut data: Option<&mut [u8]>, tag: Tag, tree: &FanTree) -> Result<(), Fault> {
        for child in tree.children() {
            self.accept(data.as_deref_mut(), child, tag)?;
        }
        if let Some(parent) = tree.parent() {
            self.relay(data.as_deref(), parent, tag)?;
        }
        Ok(())
    }

    /// Downward phase: receive from the parent, then fan out to children.
    fn descend(&self, mut data: Option<&mut [u8]>, tag: Tag, tree: &FanTree) -> Result<(), Fault> {
        if let Some(parent) = tree.parent() {
            self.accept(data.as_deref_mut(), parent, tag)?;
        }
        for child in tree.children() {
            self.relay(data.as_deref(), child, tag)?;
        }
        Ok(())
    }

    /// One tree edge's send: a payload frame, or the rendezvous marker
    /// when the phase carries no data.
    fn relay(&self, data: Option<&[u8]>, destination: Rank, tag: Tag) -> Result<(), Fault> {
        match data {
            Some(data) => self.post(
                destination,
                data.len() as i64,
                tag,
                &Frame::Payload {
                    tag,
                    data: data.to_vec(),
                },
            ),
            None => self.post(destination, NO_PAYLOAD, tag, &Frame::NoMessage),
        }
    }
}
