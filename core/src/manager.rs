use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::error::{ConfigError, ProfilerError};
use crate::section::FrameSectionId;
use crate::snapshot::Snapshot;
use crate::time::{Clock, MonotonicClock};
use crate::timeline::{CreateInfo, ProfilerTimeline};

/// Owns a set of timelines sharing one clock and fans configuration out to
/// all of them.
pub struct ProfilerManager {
    timelines: Mutex<Vec<Arc<ProfilerTimeline>>>,
    clock: Arc<dyn Clock>,
}

impl ProfilerManager {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            timelines: Mutex::new(Vec::new()),
            clock,
        }
    }

    pub fn microseconds(&self) -> f64 {
        self.clock.microseconds()
    }

    pub fn create_timeline(&self, info: CreateInfo) -> Result<Arc<ProfilerTimeline>, ConfigError> {
        info.validate()?;
        log::debug!(
            "creating timeline \"{}\" (frame delay {}, averaging {}, quarantine {})",
            info.name,
            info.frame_delay,
            info.frame_averaging_count,
            info.frame_config_delay
        );
        let timeline = Arc::new(ProfilerTimeline::new(info, self.clock.clone()));
        self.timelines.lock().push(timeline.clone());
        Ok(timeline)
    }

    /// Removes `timeline` from this manager.
    ///
    /// # Panics
    ///
    /// If the timeline is not owned by this manager.
    pub fn destroy_timeline(&self, timeline: &Arc<ProfilerTimeline>) {
        if let Err(err) = self.try_destroy_timeline(timeline) {
            panic!("{err}");
        }
    }

    pub fn try_destroy_timeline(&self, timeline: &Arc<ProfilerTimeline>) -> Result<(), ProfilerError> {
        let mut timelines = self.timelines.lock();
        let Some(index) = timelines.iter().position(|t| Arc::ptr_eq(t, timeline)) else {
            return Err(ProfilerError::UnknownTimeline(timeline.name().to_owned()));
        };
        timelines.remove(index);
        log::debug!("destroyed timeline \"{}\"", timeline.name());
        Ok(())
    }

    pub fn timelines(&self) -> Vec<Arc<ProfilerTimeline>> {
        self.timelines.lock().clone()
    }

    pub fn set_frame_averaging_count(&self, num: u32) {
        for timeline in self.timelines() {
            timeline.set_frame_averaging_count(num);
        }
    }

    pub fn set_frame_delay(&self, delay: u32) {
        for timeline in self.timelines() {
            timeline.set_frame_delay(delay);
        }
    }

    pub fn set_quarantine_length(&self, frames: u32) {
        for timeline in self.timelines() {
            timeline.set_quarantine_length(frames);
        }
    }

    pub fn reset_frame_sections(&self, delay: u32) {
        for timeline in self.timelines() {
            timeline.reset_frame_sections(delay);
        }
    }

    /// Copies the frame and async snapshot of every timeline, in creation
    /// order. Only one timeline lock is held at a time.
    pub fn get_snapshots(&self, frame_snapshots: &mut Vec<Snapshot>, async_snapshots: &mut Vec<Snapshot>) {
        let timelines = self.timelines();
        frame_snapshots.clear();
        async_snapshots.clear();
        for timeline in timelines {
            frame_snapshots.push(timeline.get_frame_snapshot());
            async_snapshots.push(timeline.get_async_snapshot());
        }
    }

    pub fn append_print(&self, stats_frames: &mut String, stats_asyncs: &mut String, full: bool) {
        let mut frame_snapshots = Vec::new();
        let mut async_snapshots = Vec::new();
        self.get_snapshots(&mut frame_snapshots, &mut async_snapshots);

        // Writing into a String cannot fail.
        for snapshot in &frame_snapshots {
            let _ = snapshot.write_report(stats_frames, full);
        }
        for snapshot in &async_snapshots {
            let _ = snapshot.write_report(stats_asyncs, full);
        }
    }
}

impl Default for ProfilerManager {
    fn default() -> Self {
        Self::new()
    }
}

struct Global {
    manager: Arc<ProfilerManager>,
    timeline: Arc<ProfilerTimeline>,
}

static GLOBAL: Lazy<RwLock<Option<Global>>> = Lazy::new(|| RwLock::new(None));

/// Process-wide manager with one default timeline.
pub struct GlobalProfiler;

impl GlobalProfiler {
    /// Creates the global manager and its default timeline. Does nothing if
    /// already initialized.
    pub fn init(timeline_name: &str) -> Result<(), ConfigError> {
        Self::init_with(CreateInfo::with_name(timeline_name))
    }

    pub fn init_with(info: CreateInfo) -> Result<(), ConfigError> {
        let mut global = GLOBAL.write();
        if global.is_some() {
            return Ok(());
        }
        let manager = Arc::new(ProfilerManager::new());
        let timeline = manager.create_timeline(info)?;
        log::info!("global profiler initialized with timeline \"{}\"", timeline.name());
        *global = Some(Global { manager, timeline });
        Ok(())
    }

    pub fn shutdown() {
        if let Some(global) = GLOBAL.write().take() {
            global.manager.destroy_timeline(&global.timeline);
            log::info!("global profiler shut down");
        }
    }

    pub fn manager() -> Option<Arc<ProfilerManager>> {
        GLOBAL.read().as_ref().map(|g| g.manager.clone())
    }

    pub fn timeline() -> Option<Arc<ProfilerTimeline>> {
        GLOBAL.read().as_ref().map(|g| g.timeline.clone())
    }

    /// Opens a frame section on the global timeline that closes when the
    /// returned guard is dropped; `None` before [`GlobalProfiler::init`].
    pub fn scope(name: &str) -> Option<GlobalScope> {
        let timeline = Self::timeline()?;
        let id = timeline.frame_begin_section(name, None);
        Some(GlobalScope { timeline, id })
    }
}

/// Guard returned by [`GlobalProfiler::scope`].
pub struct GlobalScope {
    timeline: Arc<ProfilerTimeline>,
    id: FrameSectionId,
}

impl Drop for GlobalScope {
    fn drop(&mut self) {
        self.timeline.frame_end_section(self.id);
    }
}

#[doc(hidden)]
pub fn function_name<T>(_: T) -> &'static str {
    let name = std::any::type_name::<T>();
    let name = name.strip_suffix("::__f").unwrap_or(name);
    name.strip_suffix("::{{closure}}").unwrap_or(name)
}

/// Times the rest of the enclosing scope on the global timeline.
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_scope = $crate::GlobalProfiler::scope($name);
    };
}

/// Times the rest of the enclosing function on the global timeline, named
/// after the function.
#[macro_export]
macro_rules! profile_function {
    () => {
        let _profile_scope = $crate::GlobalProfiler::scope({
            fn __f() {}
            $crate::function_name(__f)
        });
    };
}
