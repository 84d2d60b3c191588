use std::{
    collections::BTreeMap,
    os::fd::OwnedFd,
    sync::Arc,
    thread::{Builder, JoinHandle},
};
use tracing::level_filters::LevelFilter;
use troupe::{
    channel::{Link, Wiring},
    world::{Rank, World, WorldConfig},
};

pub fn mock_env_tracing() {
    if cfg!(not(miri)) {
        use tracing_subscriber::{
            Layer, fmt::layer, layer::SubscriberExt, registry, util::SubscriberInitExt,
        };

        let _ = registry()
            .with(
                layer()
                    .with_writer(std::io::stdout)
                    .with_filter(LevelFilter::TRACE),
            )
            .try_init();
    }
}

/// Builds the channel tables of an N-member group inside one process: one
/// anonymous pipe per ordered pair, handed out as per-rank wiring ready
/// for [`World::assemble`].
pub fn mock_mesh(size: usize) -> Vec<Wiring> {
    let mut inbound: Vec<BTreeMap<Rank, OwnedFd>> = (0..size).map(|_| BTreeMap::new()).collect();
    let mut outbound: Vec<BTreeMap<Rank, OwnedFd>> = (0..size).map(|_| BTreeMap::new()).collect();
    for sender in 0..size {
        for receiver in 0..size {
            if sender == receiver {
                continue;
            }
            let (reader, writer) = std::io::pipe().expect("Failed to create mesh pipe");
            inbound[receiver].insert(Rank::new(sender), OwnedFd::from(reader));
            outbound[sender].insert(Rank::new(receiver), OwnedFd::from(writer));
        }
    }
    inbound
        .into_iter()
        .zip(outbound)
        .enumerate()
        .map(|(rank, (inbound, outbound))| {
            let links = inbound
                .into_iter()
                .zip(outbound)
                .map(|((peer, inbound), (_, outbound))| (peer, Link { inbound, outbound }))
                .collect();
            Wiring::assemble(Rank::new(rank), size, links)
        })
        .collect()
}

/// Runs one world per rank, each on its own thread, and gathers the
/// routines' outputs in rank order. The routine owns its world and is
/// responsible for finalizing it.
pub fn mock_group<T: Send + 'static>(
    size: usize,
    config: WorldConfig,
    routine: impl Fn(World) -> T + Send + Sync + 'static,
) -> Vec<T> {
    let routine = Arc::new(routine);
    let members = mock_mesh(size)
        .into_iter()
        .map(|wiring| {
            let routine = routine.clone();
            Builder::new()
                .name(format!("Member {}", wiring.rank()))
                .spawn(move || {
                    tracing::event!(
                        target: "troupe::mock",
                        tracing::Level::TRACE,
                        "Member {} running in thread {:?}",
                        wiring.rank(),
                        std::thread::current().id(),
                    );
                    routine(World::assemble(wiring, config))
                })
                .expect("Failed to spawn group member")
        })
        .collect::<Vec<JoinHandle<T>>>();
    members
        .into_iter()
        .map(|member| member.join().expect("Group member panicked"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use troupe::{
        error::Fault,
        protocol::{ReduceOp, Tag},
    };

    #[test]
    fn test_ring_pass() {
        mock_env_tracing();

        let outputs = mock_group(4, WorldConfig::default(), |world| {
            let rank = world.rank().get();
            let next = Rank::new((rank + 1) % 4);
            let prev = Rank::new((rank + 3) % 4);
            world.send(&[rank as u8], next, Tag::new(7)).unwrap();
            let mut buffer = [0u8; 1];
            world.recv(&mut buffer, prev, Tag::new(7)).unwrap();
            world.finalize();
            buffer[0]
        });
        assert_eq!(outputs, vec![3, 0, 1, 2]);
    }

    #[test]
    fn test_wildcard_out_of_order() {
        mock_env_tracing();

        let outputs = mock_group(2, WorldConfig::default(), |world| {
            if world.rank().get() == 1 {
                world.send(&[0xA], Rank::new(0), Tag::new(5)).unwrap();
                world.send(&[0xB], Rank::new(0), Tag::new(9)).unwrap();
                world.finalize();
                Vec::new()
            } else {
                let mut first = [0u8; 1];
                let mut second = [0u8; 1];
                world.recv(&mut first, Rank::new(1), Tag::ANY).unwrap();
                world.recv(&mut second, Rank::new(1), Tag::ANY).unwrap();
                world.finalize();
                vec![first[0], second[0]]
            }
        });
        assert_eq!(outputs[0], vec![0xA, 0xB]);
    }

    #[test]
    fn test_send_outpaces_recv() {
        mock_env_tracing();

        // Sends complete without a matching receive in flight; receives
        // drain the buffered backlog afterwards, in order, by exact tag.
        let outputs = mock_group(2, WorldConfig::default(), |world| {
            if world.rank().get() == 0 {
                for round in 0..16u8 {
                    world
                        .send(&[round, round ^ 0xFF], Rank::new(1), Tag::new(2))
                        .unwrap();
                }
                world.finalize();
                Vec::new()
            } else {
                std::thread::sleep(Duration::from_millis(20));
                let mut gathered = Vec::new();
                for _ in 0..16 {
                    let mut buffer = [0u8; 2];
                    world.recv(&mut buffer, Rank::new(0), Tag::new(2)).unwrap();
                    gathered.push(buffer[0]);
                }
                world.finalize();
                gathered
            }
        });
        assert_eq!(outputs[1], (0..16).collect::<Vec<u8>>());
    }

    #[test]
    fn test_barrier() {
        mock_env_tracing();

        let outputs = mock_group(6, WorldConfig::default(), |world| {
            let result = world.barrier();
            world.finalize();
            result
        });
        assert!(outputs.iter().all(|result| result.is_ok()));
    }

    #[test]
    fn test_broadcast_from_inner_root() {
        mock_env_tracing();

        let outputs = mock_group(5, WorldConfig::default(), |world| {
            let mut data = if world.rank().get() == 2 {
                [7, 8, 9]
            } else {
                [0; 3]
            };
            world.broadcast(&mut data, Rank::new(2)).unwrap();
            world.finalize();
            data
        });
        assert!(outputs.iter().all(|data| *data == [7, 8, 9]));
    }

    #[test]
    fn test_reduce_sum() {
        mock_env_tracing();

        let outputs = mock_group(4, WorldConfig::default(), |world| {
            let rank = world.rank().get() as u8;
            let mut gathered = [0u8; 3];
            world
                .reduce(&[rank; 3], &mut gathered, ReduceOp::Sum, Rank::new(0))
                .unwrap();
            world.finalize();
            gathered
        });
        assert_eq!(outputs[0], [6, 6, 6]);
        assert!(outputs[1..].iter().all(|data| *data == [0; 3]));
    }

    #[test]
    fn test_reduce_all_ops() {
        mock_env_tracing();

        for (op, expected) in [
            (ReduceOp::Max, [3u8, 13]),
            (ReduceOp::Min, [0, 10]),
            (ReduceOp::Sum, [6, 46]),
            // 10 * 11 * 12 * 13 = 17160, wrapping to 8 modulo 256.
            (ReduceOp::Prod, [0, 8]),
        ] {
            let outputs = mock_group(4, WorldConfig::default(), move |world| {
                let rank = world.rank().get() as u8;
                let mut gathered = [0u8; 2];
                world
                    .reduce(&[rank, rank + 10], &mut gathered, op, Rank::new(3))
                    .unwrap();
                world.finalize();
                gathered
            });
            assert_eq!(outputs[3], expected, "operator {op:?}");
            assert!(outputs[..3].iter().all(|data| *data == [0; 2]));
        }
    }

    #[test]
    fn test_remote_finished() {
        mock_env_tracing();

        let outputs = mock_group(2, WorldConfig::default(), |world| {
            if world.rank().get() == 1 {
                world.finalize();
                Ok(())
            } else {
                let mut buffer = [0u8; 4];
                let result = world.recv(&mut buffer, Rank::new(1), Tag::ANY);
                world.finalize();
                result
            }
        });
        assert_eq!(outputs[0], Err(Fault::RemoteFinished(Rank::new(1))));
        assert_eq!(outputs[1], Ok(()));
    }

    #[test]
    fn test_mutual_deadlock_detected() {
        mock_env_tracing();

        let config = WorldConfig::default().detect_deadlock(true);
        let outputs = mock_group(2, config, |world| {
            let peer = Rank::new(1 - world.rank().get());
            let mut buffer = [0u8; 1];
            let result = world.recv(&mut buffer, peer, Tag::new(3));
            world.finalize();
            result
        });
        assert_eq!(outputs[0], Err(Fault::DeadlockDetected(Rank::new(1))));
        assert_eq!(outputs[1], Err(Fault::DeadlockDetected(Rank::new(0))));
    }

    #[test]
    fn test_detection_leaves_matched_traffic_alone() {
        mock_env_tracing();

        // With detection on, an ordinary blocked receive is satisfied by a
        // late send instead of being mistaken for a deadlock.
        let config = WorldConfig::default().detect_deadlock(true);
        let outputs = mock_group(2, config, |world| {
            if world.rank().get() == 0 {
                let mut buffer = [0u8; 1];
                let result = world.recv(&mut buffer, Rank::new(1), Tag::new(1));
                world.finalize();
                result.map(|()| buffer[0])
            } else {
                std::thread::sleep(Duration::from_millis(20));
                let result = world.send(&[42], Rank::new(0), Tag::new(1));
                world.finalize();
                result.map(|()| 0)
            }
        });
        assert_eq!(outputs[0], Ok(42));
        assert_eq!(outputs[1], Ok(0));
    }

    #[test]
    fn test_zero_byte_payload() {
        mock_env_tracing();

        let outputs = mock_group(2, WorldConfig::default(), |world| {
            if world.rank().get() == 0 {
                let result = world.send(&[], Rank::new(1), Tag::new(11));
                world.finalize();
                result
            } else {
                let mut buffer = [0u8; 0];
                let result = world.recv(&mut buffer, Rank::new(0), Tag::new(11));
                world.finalize();
                result
            }
        });
        assert!(outputs.iter().all(|result| result.is_ok()));
    }

    #[test]
    fn test_rank_validation() {
        mock_env_tracing();

        let outputs = mock_group(1, WorldConfig::default(), |world| {
            let own = world.rank();
            let stranger = Rank::new(5);
            let mut buffer = [0u8; 1];
            let results = (
                world.send(&[1], own, Tag::new(1)),
                world.send(&[1], stranger, Tag::new(1)),
                world.recv(&mut buffer, own, Tag::ANY),
                world.recv(&mut buffer, stranger, Tag::ANY),
                world.broadcast(&mut buffer, stranger),
            );
            world.finalize();
            results
        });
        let (send_self, send_stranger, recv_self, recv_stranger, broadcast_stranger) = outputs[0];
        assert_eq!(send_self, Err(Fault::SelfOp(Rank::new(0))));
        assert_eq!(send_stranger, Err(Fault::NoSuchRank(Rank::new(5))));
        assert_eq!(recv_self, Err(Fault::SelfOp(Rank::new(0))));
        assert_eq!(recv_stranger, Err(Fault::NoSuchRank(Rank::new(5))));
        assert_eq!(broadcast_stranger, Err(Fault::NoSuchRank(Rank::new(5))));
    }

    #[test]
    fn test_init_finalize_only() {
        mock_env_tracing();

        // Bringing a group up and straight down again must not hang on
        // worker teardown.
        let outputs = mock_group(3, WorldConfig::default(), |world| {
            let identity = (world.rank().get(), world.size());
            world.finalize();
            identity
        });
        assert_eq!(outputs, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_collectives_chain() {
        mock_env_tracing();

        // A broadcast followed by a reduction of the broadcast data, with
        // barriers between, all over one world.
        let outputs = mock_group(4, WorldConfig::default(), |world| {
            let rank = world.rank().get() as u8;
            world.barrier().unwrap();
            let mut data = if rank == 1 { [5, 6] } else { [0; 2] };
            world.broadcast(&mut data, Rank::new(1)).unwrap();
            world.barrier().unwrap();
            let mut gathered = [0u8; 2];
            world
                .reduce(
                    &[data[0] + rank, data[1]],
                    &mut gathered,
                    ReduceOp::Max,
                    Rank::new(2),
                )
                .unwrap();
            world.finalize();
            (data, gathered)
        });
        for (rank, (data, gathered)) in outputs.iter().enumerate() {
            assert_eq!(*data, [5, 6]);
            if rank == 2 {
                assert_eq!(*gathered, [8, 6]);
            } else {
                assert_eq!(*gathered, [0; 2]);
            }
        }
    }
}
