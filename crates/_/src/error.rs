use crate::world::Rank;

/// Faults surfaced by world operations. Programmer errors are detected at
/// API entry and change no state; the remaining variants report conditions
/// observed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum Fault {
    /// The addressed rank is outside the group.
    #[error("no such rank: {0}")]
    NoSuchRank(Rank),
    /// The operation addressed the calling process itself.
    #[error("operation addressed to own rank {0}")]
    SelfOp(Rank),
    /// The peer already closed its side of the channel.
    #[error("remote {0} already finished")]
    RemoteFinished(Rank),
    /// Both peers are blocked on each other in symmetric receives.
    #[error("deadlock detected against {0}")]
    DeadlockDetected(Rank),
}

/// Unrecoverable system failure: report and abort the process. The library
/// makes no attempt to recover from failures of the platform underneath it.
pub(crate) fn fatal(message: impl std::fmt::Display) -> ! {
    tracing::event!(
        target: "troupe::fatal",
        tracing::Level::ERROR,
        "{}",
        message,
    );
    eprintln!("troupe: fatal: {message}");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display() {
        assert_eq!(
            Fault::NoSuchRank(Rank::new(9)).to_string(),
            "no such rank: #rank:9"
        );
        assert_eq!(
            Fault::DeadlockDetected(Rank::new(1)).to_string(),
            "deadlock detected against #rank:1"
        );
    }
}
