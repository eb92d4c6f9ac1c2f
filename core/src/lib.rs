//! Frame-staggered CPU/GPU timeline profiler.
//!
//! A producer thread brackets each frame with [`ProfilerTimeline::frame_begin`]
//! and [`ProfilerTimeline::frame_end`] and times nested sections in between.
//! GPU durations arrive through a [`GpuTimeProvider`] several frames later and
//! are merged with the CPU durations into windowed statistics, published as a
//! [`Snapshot`] that any thread can read.

pub use async_mode::AsyncSection;
pub use error::{ConfigError, ProfilerError};
pub use manager::{function_name, GlobalProfiler, GlobalScope, ProfilerManager};
pub use section::{AsyncSectionId, FrameSectionId, GpuProvider, GpuTimeProvider};
pub use snapshot::{Snapshot, TimelineId, TimerInfo, TimerStats};
pub use time::{Clock, ManualClock, MonotonicClock};
pub use time_values::TimeValues;
pub use timeline::{CreateInfo, FrameSection, ProfilerTimeline};

mod async_mode;
mod entrypoint;
mod error;
mod manager;
mod section;
mod snapshot;
pub mod time;
mod time_values;
mod timeline;

pub type Timestamp = u64;

/// Maximum number of frames a GPU result may lag behind.
pub const MAX_FRAME_DELAY: u32 = 4;
/// Number of samples kept per timer, and the largest averaging window.
pub const MAX_LAST_FRAMES: usize = 128;
