use std::fmt::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::time_values::TimeValues;

#[derive(Copy, Clone, Debug, Default, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct TimelineId(pub u64);

impl TimelineId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TimelineId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Statistics of one timer on one clock (CPU or GPU), in microseconds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimerStats {
    pub last: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Raw sample ring; the next sample goes to `cursor`.
    pub samples: Vec<f64>,
    pub cursor: usize,
}

impl TimerStats {
    pub(crate) fn from_values(values: &TimeValues) -> Self {
        Self {
            last: values.last(),
            average: values.averaged(),
            min: values.min(),
            max: values.max(),
            samples: values.samples().to_vec(),
            cursor: values.cursor(),
        }
    }

    pub(crate) fn single(value: f64) -> Self {
        Self {
            last: value,
            average: value,
            min: value,
            max: value,
            samples: vec![value],
            cursor: 0,
        }
    }

    /// Folds another repetition of the same timer into this one.
    pub(crate) fn accumulate(&mut self, values: &TimeValues) {
        self.last += values.last();
        self.average += values.averaged();
        self.min += values.min();
        self.max += values.max();
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimerInfo {
    pub level: u32,
    pub r#async: bool,
    /// Several same-named sections of the frame were summed into this entry.
    pub accumulated: bool,
    pub num_averaged: u32,
    pub cpu: TimerStats,
    pub gpu: TimerStats,
}

/// Immutable copy of a timeline's statistics, safe to hand to other threads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub name: String,
    pub id: TimelineId,
    pub timer_infos: Vec<TimerInfo>,
    pub timer_names: Vec<String>,
    pub timer_api_names: Vec<String>,
}

impl Snapshot {
    pub(crate) fn new(name: &str, id: TimelineId) -> Self {
        Self {
            name: name.to_owned(),
            id,
            ..Default::default()
        }
    }

    pub(crate) fn push(&mut self, name: &str, api_name: String, info: TimerInfo) {
        self.timer_infos.push(info);
        self.timer_names.push(name.to_owned());
        self.timer_api_names.push(api_name);
    }

    pub(crate) fn clear_timers(&mut self) {
        self.timer_infos.clear();
        self.timer_names.clear();
        self.timer_api_names.clear();
    }

    pub fn len(&self) -> usize {
        self.timer_infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timer_infos.is_empty()
    }

    /// `(name, api name, info)` of every timer, in report order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &TimerInfo)> {
        self.timer_names
            .iter()
            .zip(&self.timer_api_names)
            .zip(&self.timer_infos)
            .map(|((name, api), info)| (name.as_str(), api.as_str(), info))
    }

    pub fn find(&self, name: &str) -> Option<(&TimerInfo, &str)> {
        self.iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, api, info)| (info, api))
    }

    /// Appends one line per timer to `out`, either a compact indented tree or
    /// the full statistics.
    pub fn write_report(&self, out: &mut impl Write, full: bool) -> fmt::Result {
        const MAX_LEVELS: usize = 8;
        const MAX_LEVEL: u32 = MAX_LEVELS as u32 - 1;
        const SPACES: &str = "        ";

        let found_max_level = self
            .timer_infos
            .iter()
            .map(|info| info.level)
            .max()
            .unwrap_or(0)
            .min(MAX_LEVEL);

        for (name, _, info) in self.iter() {
            let level = info.level.min(MAX_LEVEL);
            let timer_name = if name.is_empty() { "N/A" } else { name };
            let shown_level = if info.r#async { -1 } else { info.level as i64 };

            if full {
                writeln!(
                    out,
                    "Timeline \"{}\"; level {}; Timer \"{}\"; GPU; avg {}; min {}; max {}; last {}; CPU; avg {}; min {}; max {}; last {}; samples {};",
                    self.name,
                    shown_level,
                    timer_name,
                    info.gpu.average as u32,
                    info.gpu.min as u32,
                    info.gpu.max as u32,
                    info.gpu.last as u32,
                    info.cpu.average as u32,
                    info.cpu.min as u32,
                    info.cpu.max as u32,
                    info.cpu.last as u32,
                    info.num_averaged,
                )?;
            } else {
                let indent = &SPACES[..MAX_LEVELS - level as usize];
                let indent_op = &SPACES[..MAX_LEVELS - (found_max_level - level) as usize];
                writeln!(
                    out,
                    "{:12}; {:3};{}{:16}{}; GPU; avg {:6}; CPU; avg {:6}; microseconds;",
                    self.name,
                    shown_level,
                    indent,
                    timer_name,
                    indent_op,
                    info.gpu.average as u32,
                    info.cpu.average as u32,
                )?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_report(f, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new("Main", TimelineId(7));
        snapshot.push(
            "Frame",
            "GPU".to_owned(),
            TimerInfo {
                level: 0,
                num_averaged: 3,
                cpu: TimerStats::single(1000.4),
                gpu: TimerStats::single(500.9),
                ..Default::default()
            },
        );
        snapshot.push(
            "Draw",
            "vk".to_owned(),
            TimerInfo {
                level: 1,
                num_averaged: 3,
                cpu: TimerStats::single(200.),
                gpu: TimerStats::single(150.),
                ..Default::default()
            },
        );
        snapshot.push("", String::new(), TimerInfo::default());
        snapshot
    }

    #[test]
    fn test_find() {
        let snapshot = sample();
        assert_eq!(snapshot.len(), 3);
        let (info, api) = snapshot.find("Draw").unwrap();
        assert_eq!(api, "vk");
        assert_eq!(info.cpu.last, 200.);
        assert!(snapshot.find("Missing").is_none());
    }

    #[test]
    fn test_compact_report() {
        let report = sample().to_string();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Main        ;   0;"));
        assert!(lines[0].contains("Frame"));
        assert!(lines[0].ends_with("; GPU; avg    500; CPU; avg   1000; microseconds;"));
        assert!(lines[2].contains("N/A"));
    }

    #[test]
    fn test_full_report() {
        let mut report = String::new();
        sample().write_report(&mut report, true).unwrap();
        assert!(report.starts_with(
            "Timeline \"Main\"; level 0; Timer \"Frame\"; GPU; avg 500; min 500; max 500; last 500; CPU; avg 1000;"
        ));
        assert!(report.contains("Timer \"Draw\"; GPU; avg 150;"));
    }

    #[test]
    fn test_async_level() {
        let mut snapshot = Snapshot::new("Main", TimelineId(1));
        snapshot.push(
            "Upload",
            String::new(),
            TimerInfo {
                level: 1,
                r#async: true,
                ..Default::default()
            },
        );
        let mut report = String::new();
        snapshot.write_report(&mut report, true).unwrap();
        assert!(report.contains("level -1;"));
    }
}
