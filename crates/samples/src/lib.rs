//! Shared plumbing of the demo programs. Run the demos under the
//! launcher, for example:
//!
//! ```sh
//! cargo build -p troupe-samples --examples
//! troupe-launch 4 target/debug/examples/ring
//! ```

use troupe::world::{World, WorldConfig};

/// Brings tracing and the world up the way every demo does.
pub fn join_world(config: WorldConfig) -> World {
    troupe_mock::mock_env_tracing();
    World::init(config)
}
