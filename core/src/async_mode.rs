use crate::section::{api_name, AsyncSectionId, CpuSpan, GpuProvider};
use crate::snapshot::{Snapshot, TimerInfo, TimerStats};
use crate::ProfilerTimeline;

/// Sections that live outside the frame loop, identified by name.
pub(crate) struct AsyncData {
    sections: Vec<AsyncSlot>,
    live: usize,
}

#[derive(Default)]
struct AsyncSlot {
    // Empty when the slot is free.
    name: String,
    provider: Option<GpuProvider>,
    cpu: CpuSpan,
    num_times: u32,
    generation: u32,
}

impl AsyncSlot {
    fn free(&mut self) {
        self.name.clear();
        self.provider = None;
        self.cpu = CpuSpan::Empty;
        self.num_times = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}

impl AsyncData {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sections: (0..capacity.max(1)).map(|_| AsyncSlot::default()).collect(),
            live: 0,
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.sections[..self.live] {
            slot.free();
        }
        self.live = 0;
    }

    fn claim(&mut self, name: &str) -> usize {
        let live = &self.sections[..self.live];
        let reused = live
            .iter()
            .position(|s| s.name == name)
            .or_else(|| live.iter().position(|s| s.name.is_empty()));
        if let Some(i) = reused {
            return i;
        }

        let i = self.live;
        self.live += 1;
        if i >= self.sections.len() {
            let len = (self.sections.len() * 2).max(i + 1);
            self.sections.resize_with(len, AsyncSlot::default);
        }
        i
    }

    fn slot_mut(&mut self, id: AsyncSectionId) -> Option<&mut AsyncSlot> {
        self.sections[..self.live]
            .get_mut(id.id as usize)
            .filter(|s| s.generation == id.generation && !s.name.is_empty())
    }

    fn timer_info(&self, i: usize) -> Option<TimerInfo> {
        let slot = &self.sections[i];
        let cpu = slot.cpu.elapsed()?;
        let gpu = match &slot.provider {
            Some(provider) => provider.async_time(AsyncSectionId {
                id: i as u32,
                generation: slot.generation,
            })?,
            None => 0.,
        };
        Some(TimerInfo {
            level: 0,
            r#async: true,
            accumulated: false,
            num_averaged: slot.num_times,
            cpu: TimerStats::single(cpu),
            gpu: TimerStats::single(gpu),
        })
    }
}

impl ProfilerTimeline {
    /// Starts timing `name`, reusing its slot if it already exists or a freed
    /// slot otherwise.
    pub fn async_begin_section(&self, name: &str, provider: Option<&GpuProvider>) -> AsyncSectionId {
        debug_assert!(!name.is_empty(), "async sections need a name");
        let mut data = self.async_data.lock();
        let i = data.claim(name);
        let slot = &mut data.sections[i];
        if slot.name != name {
            slot.name = name.to_owned();
        }
        slot.provider = provider.cloned();
        slot.num_times = 0;
        slot.cpu = CpuSpan::Running { since: self.now() };
        AsyncSectionId {
            id: i as u32,
            generation: slot.generation,
        }
    }

    pub fn async_end_section(&self, id: AsyncSectionId) {
        let now = self.now();
        let mut data = self.async_data.lock();
        match data.slot_mut(id) {
            Some(slot) => {
                slot.cpu.end(now);
                slot.num_times = 1;
            }
            None => log::warn!(
                "timeline \"{}\": ignoring stale async section {:?}",
                self.name(),
                id
            ),
        }
    }

    pub fn async_reset_cpu_begin(&self, id: AsyncSectionId) {
        let mut data = self.async_data.lock();
        let now = self.now();
        match data.slot_mut(id) {
            Some(slot) => slot.cpu = CpuSpan::Running { since: now },
            None => log::warn!(
                "timeline \"{}\": ignoring stale async section {:?}",
                self.name(),
                id
            ),
        }
    }

    /// Frees the slot of `name` for reuse. Unknown names are ignored.
    pub fn async_remove_timer(&self, name: &str) {
        let mut data = self.async_data.lock();
        let live = data.live;
        let Some(i) = data.sections[..live].iter().position(|s| s.name == name) else {
            return;
        };
        data.sections[i].free();
        while data.live > 0 && data.sections[data.live - 1].name.is_empty() {
            data.live -= 1;
        }
    }

    /// Builds a fresh snapshot of all finished async sections whose GPU
    /// time is available, below a synthetic "Async" parent entry.
    pub fn get_async_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new(self.name(), self.id());
        let data = self.async_data.lock();
        snapshot.push("Async", "GPU".to_owned(), TimerInfo::default());

        for (i, slot) in data.sections[..data.live].iter().enumerate() {
            if slot.name.is_empty() {
                continue;
            }
            if let Some(mut info) = data.timer_info(i) {
                info.level += 1;
                snapshot.push(&slot.name, api_name(slot.provider.as_ref()), info);
            }
        }

        if snapshot.len() == 1 {
            snapshot.clear_timers();
        }
        snapshot
    }

    pub fn get_async_timer_info(&self, name: &str) -> Option<(TimerInfo, String)> {
        let data = self.async_data.lock();
        let i = data.sections[..data.live]
            .iter()
            .position(|s| !name.is_empty() && s.name == name)?;
        let info = data.timer_info(i)?;
        Some((info, api_name(data.sections[i].provider.as_ref())))
    }

    /// Opens an async section that is closed when the returned guard is
    /// dropped.
    pub fn async_section(&self, name: &str) -> AsyncSection<'_> {
        self.async_section_with(name, None)
    }

    pub fn async_section_with(&self, name: &str, provider: Option<&GpuProvider>) -> AsyncSection<'_> {
        AsyncSection {
            timeline: self,
            id: self.async_begin_section(name, provider),
        }
    }
}

/// Guard returned by [`ProfilerTimeline::async_section`].
pub struct AsyncSection<'a> {
    timeline: &'a ProfilerTimeline,
    id: AsyncSectionId,
}

impl AsyncSection<'_> {
    pub fn id(&self) -> AsyncSectionId {
        self.id
    }
}

impl Drop for AsyncSection<'_> {
    fn drop(&mut self) {
        self.timeline.async_end_section(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::section::{FrameSectionId, GpuTimeProvider};
    use crate::timeline::tests::timeline;
    use crate::CreateInfo;

    /// GPU results become available once `ready` is set.
    #[derive(Default)]
    struct LatchedGpu {
        ready: AtomicU64,
    }

    impl LatchedGpu {
        fn report(&self, micros: f64) {
            self.ready.store(micros.to_bits(), Ordering::Release);
        }
    }

    impl GpuTimeProvider for LatchedGpu {
        fn api_name(&self) -> &str {
            "Latched"
        }

        fn frame_time(&self, _: FrameSectionId) -> Option<f64> {
            None
        }

        fn async_time(&self, _: AsyncSectionId) -> Option<f64> {
            match self.ready.load(Ordering::Acquire) {
                0 => None,
                bits => Some(f64::from_bits(bits)),
            }
        }
    }

    fn small() -> CreateInfo {
        CreateInfo {
            default_timers: 2,
            ..CreateInfo::with_name("Async")
        }
    }

    #[test]
    fn test_async_with_gpu() {
        let (clock, timeline) = timeline(small());
        let latched = Arc::new(LatchedGpu::default());
        let provider: GpuProvider = latched.clone();

        let id = timeline.async_begin_section("Upload", Some(&provider));
        clock.advance(40.);
        latched.report(250.);
        timeline.async_end_section(id);

        let snapshot = timeline.get_async_snapshot();
        assert_eq!(snapshot.timer_names, ["Async", "Upload"]);
        assert_eq!(snapshot.timer_api_names, ["GPU", "Latched"]);
        let (upload, api) = snapshot.find("Upload").unwrap();
        assert_eq!(api, "Latched");
        assert!(upload.r#async);
        assert_eq!(upload.level, snapshot.timer_infos[0].level + 1);
        assert_eq!(upload.num_averaged, 1);
        assert_eq!(upload.gpu.average, 250.);
        assert_eq!(upload.cpu.last, 40.);
    }

    #[test]
    fn test_unresolved_gpu_is_omitted() {
        let (clock, timeline) = timeline(small());
        let provider: GpuProvider = Arc::new(LatchedGpu::default());
        let id = timeline.async_begin_section("Upload", Some(&provider));
        clock.advance(1.);
        timeline.async_end_section(id);
        assert!(timeline.get_async_snapshot().is_empty());
        assert!(timeline.get_async_timer_info("Upload").is_none());
    }

    #[test]
    fn test_running_section_is_omitted() {
        let (clock, timeline) = timeline(small());
        let id = timeline.async_begin_section("Load", None);
        clock.advance(5.);
        assert!(timeline.get_async_snapshot().is_empty());
        timeline.async_end_section(id);
        let (info, api) = timeline.get_async_timer_info("Load").unwrap();
        assert_eq!(api, "");
        assert_eq!(info.cpu.average, 5.);
        assert_eq!(info.gpu.average, 0.);
    }

    #[test]
    fn test_slot_reuse() {
        let (clock, timeline) = timeline(small());
        let upload = timeline.async_begin_section("Upload", None);
        clock.advance(1.);
        timeline.async_end_section(upload);
        timeline.async_remove_timer("Upload");

        let download = timeline.async_begin_section("Download", None);
        assert_eq!(download.id, upload.id);
        assert_ne!(download.generation, upload.generation);

        // the stale handle must not end the new section
        clock.advance(2.);
        timeline.async_end_section(upload);
        assert!(timeline.get_async_snapshot().is_empty());

        clock.advance(3.);
        timeline.async_end_section(download);
        let snapshot = timeline.get_async_snapshot();
        assert_eq!(snapshot.timer_names, ["Async", "Download"]);
        assert_eq!(snapshot.find("Download").unwrap().0.cpu.last, 5.);
    }

    #[test]
    fn test_same_name_reuses_slot() {
        let (clock, timeline) = timeline(small());
        let first = timeline.async_begin_section("Compile", None);
        timeline.async_end_section(first);
        let second = timeline.async_begin_section("Compile", None);
        assert_eq!(first, second);
        clock.advance(9.);
        timeline.async_end_section(second);
        assert_eq!(timeline.get_async_snapshot().len(), 2);
        assert_eq!(
            timeline.get_async_timer_info("Compile").unwrap().0.cpu.last,
            9.
        );
    }

    #[test]
    fn test_high_water_mark() {
        let (_clock, timeline) = timeline(small());
        for name in ["A", "B", "C"] {
            let id = timeline.async_begin_section(name, None);
            timeline.async_end_section(id);
        }
        timeline.async_remove_timer("B");
        let d = timeline.async_begin_section("D", None);
        timeline.async_end_section(d);
        assert_eq!(d.id, 1);
        // "Async" + A, D, C
        assert_eq!(timeline.get_async_snapshot().len(), 4);

        timeline.async_remove_timer("C");
        timeline.async_remove_timer("D");
        timeline.async_remove_timer("Unknown");
        let e = timeline.async_begin_section("E", None);
        assert_eq!(e.id, 1);
        timeline.async_end_section(e);
        assert_eq!(timeline.get_async_snapshot().timer_names, ["Async", "A", "E"]);
    }

    #[test]
    fn test_reset_cpu_begin() {
        let (clock, timeline) = timeline(small());
        let id = timeline.async_begin_section("Stream", None);
        clock.advance(50.);
        timeline.async_reset_cpu_begin(id);
        clock.advance(4.);
        timeline.async_end_section(id);
        assert_eq!(
            timeline.get_async_timer_info("Stream").unwrap().0.cpu.last,
            4.
        );
    }

    #[test]
    fn test_guard_and_clear() {
        let (clock, timeline) = timeline(small());
        let stale = {
            let section = timeline.async_section("Scoped");
            clock.advance(6.);
            section.id()
        };
        assert_eq!(
            timeline.get_async_timer_info("Scoped").unwrap().0.cpu.last,
            6.
        );
        timeline.clear();
        assert!(timeline.get_async_snapshot().is_empty());

        let fresh = timeline.async_begin_section("Other", None);
        assert_eq!(fresh.id, stale.id);
        assert_ne!(fresh.generation, stale.generation);
    }

    #[test]
    fn test_concurrent_async_sections() {
        let (_clock, timeline) = timeline(small());
        let timeline = Arc::new(timeline);
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let timeline = timeline.clone();
                thread::spawn(move || {
                    let name = format!("Job{i}");
                    for _ in 0..100 {
                        let id = timeline.async_begin_section(&name, None);
                        timeline.async_end_section(id);
                        assert!(timeline.get_async_snapshot().len() <= 9);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(timeline.get_async_snapshot().len(), 9);
    }
}
