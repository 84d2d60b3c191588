//! Collectives in sequence: rank zero broadcasts a payload, every rank
//! contributes to a sum reduction, and a barrier closes the round.

use troupe::{protocol::ReduceOp, world::{Rank, WorldConfig}};

fn main() {
    let world = troupe_samples::join_world(WorldConfig::default());
    let rank = world.rank().get();
    let root = Rank::new(0);

    let mut verse = if world.rank() == root {
        [7, 8, 9]
    } else {
        [0; 3]
    };
    world.broadcast(&mut verse, root).expect("broadcast");
    println!("rank {rank}: verse {verse:?}");

    let mut chorus = [0u8; 3];
    world
        .reduce(&[rank as u8; 3], &mut chorus, ReduceOp::Sum, root)
        .expect("reduce");
    if world.rank() == root {
        println!("rank {rank}: chorus {chorus:?}");
    }

    world.barrier().expect("barrier");
    world.finalize();
}
