//! Token pass around the whole group: every rank hands its own number to
//! its right neighbor and reports what arrived from the left.

use troupe::{protocol::Tag, world::{Rank, WorldConfig}};

const TOKEN_TAG: Tag = Tag::new(7);

fn main() {
    let world = troupe_samples::join_world(WorldConfig::default());
    let rank = world.rank().get();
    let size = world.size();

    let next = Rank::new((rank + 1) % size);
    let prev = Rank::new((rank + size - 1) % size);

    world
        .send(&[rank as u8], next, TOKEN_TAG)
        .expect("send to the right neighbor");
    let mut token = [0u8; 1];
    world
        .recv(&mut token, prev, TOKEN_TAG)
        .expect("recv from the left neighbor");

    println!("rank {rank}: received token {} from {prev}", token[0]);
    world.finalize();
}
