//! Deadlock detection demo for a group of two: both ranks receive from
//! each other with nothing in flight, and both learn about it instead of
//! hanging forever.

use troupe::{protocol::Tag, world::{Rank, WorldConfig}};

fn main() {
    let world = troupe_samples::join_world(WorldConfig::default().detect_deadlock(true));
    let rank = world.rank().get();
    assert_eq!(world.size(), 2, "run this demo as: troupe-launch 2 standoff");

    let peer = Rank::new(1 - rank);
    let mut buffer = [0u8; 1];
    match world.recv(&mut buffer, peer, Tag::new(3)) {
        Ok(()) => println!("rank {rank}: unexpectedly received {buffer:?}"),
        Err(fault) => println!("rank {rank}: {fault}"),
    }
    world.finalize();
}
