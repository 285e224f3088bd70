use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for a running tournament.
///
/// `Player` stays local to the referee and costs the offender the game,
/// unless strict mode escalates it to `Terminated`. `Terminated` is the
/// cooperative cancellation state: every blocking primitive observes the
/// stop flag and raises it, and workers catch it at the loop boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// protocol or contract violation by a bot: timeout, illegal move,
    /// process death, output overflow
    #[error("player error: {0}")]
    Player(String),
    /// cooperative cancellation observed at a suspension point
    #[error("match terminated")]
    Terminated,
    /// OS or resource failure: spawn, pipe, poll
    #[error("system error: {0}")]
    System(String),
    /// impossible input detected at setup
    #[error("config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::System(e.to_string())
    }
}
