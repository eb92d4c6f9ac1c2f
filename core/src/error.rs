use thiserror::Error;

use crate::{MAX_FRAME_DELAY, MAX_LAST_FRAMES};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("frame delay must be between 1 and {max}, got {0}", max = MAX_FRAME_DELAY)]
    FrameDelay(u32),
    #[error("averaging window must be at most {max} frames, got {0}", max = MAX_LAST_FRAMES)]
    AveragingCount(u32),
    #[error("a timeline needs at least one default timer slot")]
    NoTimers,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfilerError {
    #[error("timeline \"{0}\" is not owned by this profiler manager")]
    UnknownTimeline(String),
}
