/// Errors reported while setting up a remote access world.
///
/// Once a world is running nothing in the access path returns an error: a peer that
/// stops making progress shows up as a (warned about) spin, never as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RmaError {
    /// queue size outside of 1..=MAX_QUEUE_SIZE
    InvalidQueueSize(usize),
    /// number of pes outside of 1..=MAX_PES
    InvalidNumPes(usize),
    /// segment length outside of 1..=MAX_SEGMENT_LEN
    InvalidSegmentLen(usize),
    /// a cooperating team (named) was configured with zero threads
    EmptyTeam(&'static str),
    /// cache with zero slots
    InvalidCacheSize(usize),
    /// the configured backend name is not known
    UnknownBackend(String),
}

impl std::fmt::Display for RmaError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RmaError::InvalidQueueSize(size) => {
                write!(
                    f,
                    "queue size {} must be between 1 and {}",
                    size,
                    crate::command::MAX_QUEUE_SIZE
                )
            }
            RmaError::InvalidNumPes(num_pes) => {
                write!(
                    f,
                    "number of pes {} must be between 1 and {}",
                    num_pes,
                    crate::command::MAX_PES
                )
            }
            RmaError::InvalidSegmentLen(len) => {
                write!(
                    f,
                    "segment length {} must be between 1 and {}",
                    len,
                    crate::command::MAX_SEGMENT_LEN
                )
            }
            RmaError::EmptyTeam(team) => {
                write!(f, "the {} team needs at least one thread", team)
            }
            RmaError::InvalidCacheSize(size) => {
                write!(f, "cache size {} must be non zero", size)
            }
            RmaError::UnknownBackend(name) => {
                write!(f, "unknown lamellae backend {:?}", name)
            }
        }
    }
}

impl std::error::Error for RmaError {}

pub type RmaResult<T> = Result<T, RmaError>;
