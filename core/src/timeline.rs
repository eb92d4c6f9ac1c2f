use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::async_mode::AsyncData;
use crate::error::ConfigError;
use crate::section::{
    api_name, CpuSpan, FrameSectionId, GpuProvider, SectionData, SectionKey, SubFrameTimes,
};
use crate::snapshot::{Snapshot, TimelineId, TimerInfo, TimerStats};
use crate::time::Clock;
use crate::time_values::TimeValues;
use crate::{MAX_FRAME_DELAY, MAX_LAST_FRAMES};

#[derive(Clone, Debug)]
pub struct CreateInfo {
    pub name: String,
    /// Frames of zeroed statistics after the frame's section layout changed.
    pub frame_config_delay: u32,
    /// Initial capacity of the frame and async section tables.
    pub default_timers: usize,
    /// Frames a GPU result lags behind the frame that issued it.
    pub frame_delay: u32,
    /// Averaging window; 0 averages over all frames.
    pub frame_averaging_count: u32,
}

impl Default for CreateInfo {
    fn default() -> Self {
        Self {
            name: "Main".to_owned(),
            frame_config_delay: 8,
            default_timers: 128,
            frame_delay: MAX_FRAME_DELAY,
            frame_averaging_count: MAX_LAST_FRAMES as u32,
        }
    }
}

impl CreateInfo {
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_FRAME_DELAY).contains(&self.frame_delay) {
            return Err(ConfigError::FrameDelay(self.frame_delay));
        }
        if self.frame_averaging_count as usize > MAX_LAST_FRAMES {
            return Err(ConfigError::AveragingCount(self.frame_averaging_count));
        }
        if self.default_timers == 0 {
            return Err(ConfigError::NoTimers);
        }
        Ok(())
    }
}

/// One independently instrumented timing context.
///
/// Frame mode (`frame_*`) must be driven by a single producer thread. Async
/// sections, snapshots and the configuration setters may be used from any
/// thread.
///
/// The producer never blocks: frame state sits behind a mutex that is only
/// ever taken with `try_lock`, which is uncontended for a single producer.
/// A second thread entering frame mode at the same time panics.
pub struct ProfilerTimeline {
    id: TimelineId,
    info: CreateInfo,
    clock: Arc<dyn Clock>,

    averaging_count: AtomicU32,
    frame_delay: AtomicU32,
    quarantine: AtomicU32,
    reset_request: AtomicU32,

    frame: Mutex<FrameData>,
    frame_snapshot: Mutex<Snapshot>,
    pub(crate) async_data: Mutex<AsyncData>,
}

struct FrameData {
    in_frame: bool,
    count: u64,
    level: u32,
    has_splitter: bool,

    frame_delay: u32,
    averaging_count_last: u32,
    reset_delay: u32,
    last_reset: Option<u64>,

    sections_count: usize,
    sections_count_last: usize,
    // First slot whose key differed from the previous frame.
    shape_changed: Option<usize>,

    cpu_current: CpuSpan,
    cpu_time: TimeValues,
    gpu_time: TimeValues,

    sections: Vec<SectionData>,
}

impl ProfilerTimeline {
    pub(crate) fn new(info: CreateInfo, clock: Arc<dyn Clock>) -> Self {
        debug_assert!(info.validate().is_ok());
        let averaging = info.frame_averaging_count.min(MAX_LAST_FRAMES as u32);
        let frame_delay = info.frame_delay.clamp(1, MAX_FRAME_DELAY);
        let capacity = info.default_timers.max(1);
        let id = TimelineId::next();

        let frame = FrameData {
            in_frame: false,
            count: 0,
            level: 1,
            has_splitter: false,
            frame_delay,
            averaging_count_last: averaging,
            reset_delay: 0,
            last_reset: None,
            sections_count: 0,
            sections_count_last: 0,
            shape_changed: None,
            cpu_current: CpuSpan::Empty,
            cpu_time: TimeValues::new(averaging as usize),
            gpu_time: TimeValues::new(averaging as usize),
            sections: (0..capacity)
                .map(|_| SectionData::new(averaging as usize))
                .collect(),
        };

        Self {
            id,
            averaging_count: AtomicU32::new(averaging),
            frame_delay: AtomicU32::new(frame_delay),
            quarantine: AtomicU32::new(info.frame_config_delay),
            reset_request: AtomicU32::new(0),
            frame: Mutex::new(frame),
            frame_snapshot: Mutex::new(Snapshot::new(&info.name, id)),
            async_data: Mutex::new(AsyncData::with_capacity(capacity)),
            clock,
            info,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn id(&self) -> TimelineId {
        self.id
    }

    pub fn create_info(&self) -> &CreateInfo {
        &self.info
    }

    pub(crate) fn now(&self) -> f64 {
        self.clock.microseconds()
    }

    fn producer(&self) -> MutexGuard<'_, FrameData> {
        match self.frame.try_lock() {
            Some(frame) => frame,
            None => panic!(
                "frame-mode API of timeline \"{}\" used from more than one thread at once",
                self.info.name
            ),
        }
    }

    // Configuration. Applied by the producer at the next frame boundary.

    pub fn set_frame_averaging_count(&self, num: u32) {
        debug_assert!(num as usize <= MAX_LAST_FRAMES);
        self.averaging_count
            .store(num.min(MAX_LAST_FRAMES as u32), Ordering::Release);
    }

    pub fn frame_averaging_count(&self) -> u32 {
        self.averaging_count.load(Ordering::Acquire)
    }

    pub fn set_frame_delay(&self, delay: u32) {
        debug_assert!((1..=MAX_FRAME_DELAY).contains(&delay));
        self.frame_delay
            .store(delay.clamp(1, MAX_FRAME_DELAY), Ordering::Release);
    }

    pub fn frame_delay(&self) -> u32 {
        self.frame_delay.load(Ordering::Acquire)
    }

    pub fn set_quarantine_length(&self, frames: u32) {
        self.quarantine.store(frames, Ordering::Release);
    }

    pub fn quarantine_length(&self) -> u32 {
        self.quarantine.load(Ordering::Acquire)
    }

    /// Discards all frame statistics for `delay` frames, or for the
    /// quarantine length if `delay` is 0.
    pub fn reset_frame_sections(&self, delay: u32) {
        let delay = if delay == 0 {
            self.quarantine_length()
        } else {
            delay
        };
        self.reset_request.fetch_max(delay, Ordering::AcqRel);
    }

    /// Drops all async sections and the published frame snapshot.
    pub fn clear(&self) {
        self.async_data.lock().clear();
        *self.frame_snapshot.lock() = Snapshot::new(&self.info.name, self.id);
    }

    // Frame mode

    pub fn frame_begin(&self) {
        let mut frame = self.producer();
        debug_assert!(!frame.in_frame, "frame_begin called inside a frame");

        let delay = self.frame_delay();
        if delay != frame.frame_delay {
            log::info!(
                "timeline \"{}\": frame delay {} -> {}",
                self.info.name,
                frame.frame_delay,
                delay
            );
            frame.frame_delay = delay;
        }

        frame.has_splitter = false;
        frame.level = 1;
        frame.sections_count = 0;
        frame.shape_changed = None;
        frame.in_frame = true;
        frame.cpu_current = CpuSpan::Running { since: self.now() };
    }

    pub fn frame_end(&self) {
        let now = self.now();
        let mut guard = self.producer();
        let frame = &mut *guard;
        debug_assert!(frame.in_frame, "frame_end called outside a frame");
        debug_assert_eq!(frame.level, 1, "unbalanced frame sections");

        frame.cpu_current.end(now);

        if frame.sections_count > 0
            && (frame.sections_count != frame.sections_count_last
                || frame.shape_changed.is_some())
        {
            log::debug!(
                "timeline \"{}\": section layout changed ({} -> {} sections, first changed slot {:?})",
                self.info.name,
                frame.sections_count_last,
                frame.sections_count,
                frame.shape_changed
            );
            frame.sections_count_last = frame.sections_count;
            frame.reset_delay = frame.reset_delay.max(self.quarantine_length());
        }

        let requested = self.reset_request.swap(0, Ordering::AcqRel);
        frame.reset_delay = frame.reset_delay.max(requested);

        if frame.reset_delay > 0 {
            frame.reset_delay -= 1;
            for section in &mut frame.sections {
                section.reset_stats();
            }
            frame.cpu_time.reset();
            frame.gpu_time.reset();
            frame.last_reset = Some(frame.count);
        }

        let averaging = self.frame_averaging_count();
        if averaging != frame.averaging_count_last {
            log::debug!(
                "timeline \"{}\": averaging window {} -> {}",
                self.info.name,
                frame.averaging_count_last,
                averaging
            );
            for section in &mut frame.sections {
                section.init_stats(averaging as usize);
            }
            frame.cpu_time.init(averaging as usize);
            frame.gpu_time.init(averaging as usize);
            frame.averaging_count_last = averaging;
        }

        frame.resolve();

        let snapshot = frame.build_snapshot(&self.info.name, self.id);
        *self.frame_snapshot.lock() = snapshot;

        frame.count += 1;
        frame.in_frame = false;
    }

    /// Ends the open frame, if any, and begins the next one.
    pub fn frame_advance(&self) {
        let in_frame = self.producer().in_frame;
        if in_frame {
            self.frame_end();
        }
        self.frame_begin();
    }

    pub fn frame_begin_section(&self, name: &str, provider: Option<&GpuProvider>) -> FrameSectionId {
        let mut guard = self.producer();
        let frame = &mut *guard;
        debug_assert!(frame.in_frame, "frame_begin_section called outside a frame");

        let id = frame.next_section_id();
        let level = frame.level;
        frame.level += 1;

        let section = &mut frame.sections[id.id as usize];
        if !section.key.matches(name, provider, level, false) {
            section.key = SectionKey {
                name: name.to_owned(),
                provider: provider.cloned(),
                level,
                splitter: false,
            };
            frame.shape_changed.get_or_insert(id.id as usize);
        }

        section.sub_frames[id.sub_frame as usize] = SubFrameTimes {
            frame: id.frame,
            cpu: CpuSpan::Running { since: self.now() },
            gpu: 0.,
        };
        id
    }

    pub fn frame_end_section(&self, id: FrameSectionId) {
        let now = self.now();
        let mut frame = self.producer();
        if !frame.owns(id) {
            log::warn!(
                "timeline \"{}\": ignoring stale frame section {:?}",
                self.info.name,
                id
            );
            return;
        }
        frame.sections[id.id as usize].sub_frames[id.sub_frame as usize]
            .cpu
            .end(now);
        frame.level = frame.level.saturating_sub(1);
    }

    pub fn frame_reset_cpu_begin(&self, id: FrameSectionId) {
        let mut frame = self.producer();
        if !frame.owns(id) {
            log::warn!(
                "timeline \"{}\": ignoring stale frame section {:?}",
                self.info.name,
                id
            );
            return;
        }
        frame.sections[id.id as usize].sub_frames[id.sub_frame as usize].cpu =
            CpuSpan::Running { since: self.now() };
    }

    /// Marks the end of one pass of a loop that reopens the same sections.
    /// Same-named sections of all passes are reported as one summed entry.
    pub fn frame_accumulation_split(&self) {
        let mut guard = self.producer();
        let frame = &mut *guard;
        debug_assert!(frame.in_frame, "frame_accumulation_split called outside a frame");

        let id = frame.next_section_id();
        let level = frame.level;
        let section = &mut frame.sections[id.id as usize];
        if !section.key.matches("", None, level, true) {
            section.key = SectionKey {
                name: String::new(),
                provider: None,
                level,
                splitter: true,
            };
            frame.shape_changed.get_or_insert(id.id as usize);
        }
        section.sub_frames[id.sub_frame as usize] = SubFrameTimes {
            frame: id.frame,
            ..Default::default()
        };
        frame.has_splitter = true;
    }

    /// Opens a section that is closed when the returned guard is dropped.
    pub fn frame_section(&self, name: &str) -> FrameSection<'_> {
        self.frame_section_with(name, None)
    }

    pub fn frame_section_with(&self, name: &str, provider: Option<&GpuProvider>) -> FrameSection<'_> {
        FrameSection {
            timeline: self,
            id: self.frame_begin_section(name, provider),
        }
    }

    pub fn get_frame_snapshot(&self) -> Snapshot {
        self.frame_snapshot.lock().clone()
    }

    /// Looks up a timer of the last published frame snapshot, returning its
    /// statistics and GPU API name.
    pub fn get_frame_timer_info(&self, name: &str) -> Option<(TimerInfo, String)> {
        self.frame_snapshot
            .lock()
            .find(name)
            .map(|(info, api)| (info.clone(), api.to_owned()))
    }
}

impl FrameData {
    fn next_section_id(&mut self) -> FrameSectionId {
        let id = self.sections_count;
        self.sections_count += 1;
        if id >= self.sections.len() {
            let len = (self.sections.len() * 2).max(id + 1);
            let averaging = self.averaging_count_last as usize;
            self.sections
                .resize_with(len, || SectionData::new(averaging));
        }
        FrameSectionId {
            id: id as u32,
            sub_frame: (self.count % self.frame_delay as u64) as u32,
            frame: self.count,
        }
    }

    fn owns(&self, id: FrameSectionId) -> bool {
        self.in_frame
            && id.frame == self.count
            && id.sub_frame as u64 == self.count % self.frame_delay as u64
            && (id.id as usize) < self.sections_count
    }

    /// Folds every sample whose results are due this frame into the running
    /// statistics. CPU-only sections are due immediately, GPU sections
    /// `frame_delay - 1` frames after they were recorded. The "Frame" totals
    /// only move once GPU results are due, so their CPU and GPU sides always
    /// hold the same number of samples.
    fn resolve(&mut self) {
        let delay = self.frame_delay as u64;
        let last_reset = self.last_reset;
        let after_reset = |f: u64| last_reset.map_or(true, |r| f > r);
        let cpu_due = Some(self.count).filter(|&f| after_reset(f));
        let gpu_due = (self.count + 1)
            .checked_sub(delay)
            .filter(|&f| after_reset(f));

        let mut gpu_total = 0.;
        let mut gpu_last_level: Option<u32> = None;

        for (i, section) in self.sections[..self.sections_count].iter_mut().enumerate() {
            if section.key.splitter {
                continue;
            }
            // A run of same-level sections ends when we climb out of it.
            if gpu_last_level.is_some_and(|level| section.key.level < level) {
                gpu_last_level = None;
            }

            let due = match section.key.provider {
                Some(_) => gpu_due,
                None => cpu_due,
            };
            let Some(due) = due else { continue };
            let sub_frame = (due % delay) as usize;
            let times = &mut section.sub_frames[sub_frame];
            if times.frame != due {
                continue;
            }
            let Some(cpu) = times.cpu.elapsed() else {
                continue;
            };
            let gpu = match &section.key.provider {
                Some(provider) => {
                    let id = FrameSectionId {
                        id: i as u32,
                        sub_frame: sub_frame as u32,
                        frame: due,
                    };
                    match provider.frame_time(id) {
                        Some(gpu) => gpu,
                        None => continue,
                    }
                }
                None => 0.,
            };
            times.gpu = gpu;
            times.cpu = CpuSpan::Empty;

            section.cpu_time.add(cpu);
            section.gpu_time.add(times.gpu);
            section.num_times += 1;

            if gpu_last_level.map_or(true, |level| level == section.key.level) {
                gpu_total += gpu;
                gpu_last_level = Some(section.key.level);
            }
        }

        if gpu_due.is_some() {
            if let Some(cpu) = self.cpu_current.elapsed() {
                self.cpu_time.add(cpu);
                self.gpu_time.add(gpu_total);
            }
        }
    }

    fn build_snapshot(&mut self, name: &str, id: TimelineId) -> Snapshot {
        let mut snapshot = Snapshot::new(name, id);

        if self.cpu_time.valid_count() > 0 {
            snapshot.push(
                "Frame",
                "GPU".to_owned(),
                TimerInfo {
                    num_averaged: self.cpu_time.valid_count() as u32,
                    cpu: TimerStats::from_values(&self.cpu_time),
                    gpu: TimerStats::from_values(&self.gpu_time),
                    ..Default::default()
                },
            );
        }

        let count = self.sections_count_last;
        for section in &mut self.sections[..count] {
            section.accumulated = false;
        }
        for i in 0..count {
            if self.sections[i].key.splitter {
                continue;
            }
            if let Some(info) = self.timer_info(i) {
                let key = &self.sections[i].key;
                snapshot.push(&key.name, api_name(key.provider.as_ref()), info);
            }
        }
        snapshot
    }

    fn timer_info(&mut self, i: usize) -> Option<TimerInfo> {
        let count = self.sections_count_last;
        let has_splitter = self.has_splitter;
        let (head, tail) = self.sections[..count].split_at_mut(i + 1);
        let section = &head[i];
        if section.num_times == 0 || section.accumulated {
            return None;
        }

        let mut info = TimerInfo {
            level: section.key.level,
            num_averaged: section.cpu_time.valid_count() as u32,
            cpu: TimerStats::from_values(&section.cpu_time),
            gpu: TimerStats::from_values(&section.gpu_time),
            ..Default::default()
        };

        if has_splitter {
            for other in tail {
                if !other.key.splitter && !other.accumulated && other.key.same_timer(&section.key)
                {
                    info.cpu.accumulate(&other.cpu_time);
                    info.gpu.accumulate(&other.gpu_time);
                    info.accumulated = true;
                    other.accumulated = true;
                }
                if other.key.splitter && other.key.level < section.key.level {
                    break;
                }
            }
        }
        Some(info)
    }
}

/// Guard returned by [`ProfilerTimeline::frame_section`].
pub struct FrameSection<'a> {
    timeline: &'a ProfilerTimeline,
    id: FrameSectionId,
}

impl FrameSection<'_> {
    pub fn id(&self) -> FrameSectionId {
        self.id
    }
}

impl Drop for FrameSection<'_> {
    fn drop(&mut self) {
        self.timeline.frame_end_section(self.id);
    }
}
