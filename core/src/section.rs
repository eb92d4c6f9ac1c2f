use std::fmt;
use std::sync::Arc;

use crate::time_values::TimeValues;
use crate::MAX_FRAME_DELAY;

/// Handle returned by [`crate::ProfilerTimeline::frame_begin_section`].
///
/// `frame` is the number of the frame that issued the handle; ending a
/// section with a handle from another frame is detected and ignored.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameSectionId {
    pub id: u32,
    pub sub_frame: u32,
    pub frame: u64,
}

impl FrameSectionId {
    /// First of the two query slots (begin, end) reserved for this section.
    pub fn timer_base_index(&self) -> u32 {
        ((self.id * MAX_FRAME_DELAY) + self.sub_frame) * 2
    }
}

/// Handle returned by [`crate::ProfilerTimeline::async_begin_section`].
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AsyncSectionId {
    pub id: u32,
    pub generation: u32,
}

impl AsyncSectionId {
    pub fn timer_base_index(&self) -> u32 {
        self.id * 2
    }
}

/// Resolves GPU durations (in microseconds) for previously issued sections.
///
/// The profiler never talks to a graphics API itself. A provider typically
/// writes two timestamp queries per section at
/// [`FrameSectionId::timer_base_index`] and reads them back once the GPU is
/// done; `None` means the result is not available yet.
pub trait GpuTimeProvider: Send + Sync {
    fn api_name(&self) -> &str;

    fn frame_time(&self, section: FrameSectionId) -> Option<f64>;

    fn async_time(&self, section: AsyncSectionId) -> Option<f64>;
}

pub type GpuProvider = Arc<dyn GpuTimeProvider>;

pub(crate) fn same_provider(a: Option<&GpuProvider>, b: Option<&GpuProvider>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const (),
        _ => false,
    }
}

pub(crate) fn api_name(provider: Option<&GpuProvider>) -> String {
    provider.map(|p| p.api_name().to_owned()).unwrap_or_default()
}

/// CPU time of one section instance.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum CpuSpan {
    #[default]
    Empty,
    Running {
        since: f64,
    },
    Elapsed(f64),
}

impl CpuSpan {
    pub fn end(&mut self, now: f64) {
        if let CpuSpan::Running { since } = *self {
            *self = CpuSpan::Elapsed(now - since);
        }
    }

    pub fn elapsed(&self) -> Option<f64> {
        match self {
            CpuSpan::Elapsed(d) => Some(*d),
            _ => None,
        }
    }
}

/// Raw timings of one subframe slot, tagged with the frame that wrote them.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct SubFrameTimes {
    pub frame: u64,
    pub cpu: CpuSpan,
    pub gpu: f64,
}

/// What a slot looked like the last time it was recorded. A slot keeps its
/// index across frames; a different key at the same index means the call
/// graph changed.
#[derive(Clone, Default)]
pub(crate) struct SectionKey {
    pub name: String,
    pub provider: Option<GpuProvider>,
    pub level: u32,
    pub splitter: bool,
}

impl SectionKey {
    pub fn matches(
        &self,
        name: &str,
        provider: Option<&GpuProvider>,
        level: u32,
        splitter: bool,
    ) -> bool {
        self.name == name
            && same_provider(self.provider.as_ref(), provider)
            && self.level == level
            && self.splitter == splitter
    }

    /// Whether two sections would be merged into one report entry.
    pub fn same_timer(&self, other: &SectionKey) -> bool {
        self.name == other.name
            && self.level == other.level
            && same_provider(self.provider.as_ref(), other.provider.as_ref())
    }
}

impl fmt::Debug for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionKey")
            .field("name", &self.name)
            .field(
                "provider",
                &self.provider.as_ref().map(|p| p.api_name().to_owned()),
            )
            .field("level", &self.level)
            .field("splitter", &self.splitter)
            .finish()
    }
}

pub(crate) struct SectionData {
    pub key: SectionKey,
    pub sub_frames: [SubFrameTimes; MAX_FRAME_DELAY as usize],
    pub num_times: u32,
    pub cpu_time: TimeValues,
    pub gpu_time: TimeValues,
    pub accumulated: bool,
}

impl SectionData {
    pub fn new(averaging: usize) -> Self {
        Self {
            key: SectionKey::default(),
            sub_frames: Default::default(),
            num_times: 0,
            cpu_time: TimeValues::new(averaging),
            gpu_time: TimeValues::new(averaging),
            accumulated: false,
        }
    }

    pub fn reset_stats(&mut self) {
        self.num_times = 0;
        self.cpu_time.reset();
        self.gpu_time.reset();
    }

    pub fn init_stats(&mut self, averaging: usize) {
        self.num_times = 0;
        self.cpu_time.init(averaging);
        self.gpu_time.init(averaging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl GpuTimeProvider for Named {
        fn api_name(&self) -> &str {
            self.0
        }

        fn frame_time(&self, _: FrameSectionId) -> Option<f64> {
            None
        }

        fn async_time(&self, _: AsyncSectionId) -> Option<f64> {
            None
        }
    }

    #[test]
    fn test_cpu_span() {
        let mut span = CpuSpan::Running { since: 10. };
        assert_eq!(span.elapsed(), None);
        span.end(25.);
        assert_eq!(span.elapsed(), Some(15.));
        // ending twice keeps the first duration
        span.end(40.);
        assert_eq!(span.elapsed(), Some(15.));
        let mut empty = CpuSpan::Empty;
        empty.end(5.);
        assert_eq!(empty, CpuSpan::Empty);
    }

    #[test]
    fn test_provider_identity() {
        let a: GpuProvider = Arc::new(Named("vk"));
        let b: GpuProvider = Arc::new(Named("vk"));
        assert!(same_provider(Some(&a), Some(&a.clone())));
        assert!(!same_provider(Some(&a), Some(&b)));
        assert!(!same_provider(Some(&a), None));
        assert!(same_provider(None, None));
        assert_eq!(api_name(Some(&a)), "vk");
        assert_eq!(api_name(None), "");
    }

    #[test]
    fn test_timer_base_index() {
        let id = FrameSectionId {
            id: 3,
            sub_frame: 2,
            frame: 0,
        };
        assert_eq!(id.timer_base_index(), (3 * MAX_FRAME_DELAY + 2) * 2);
        let id = AsyncSectionId {
            id: 5,
            generation: 1,
        };
        assert_eq!(id.timer_base_index(), 10);
    }
}
