use std::ffi::{c_char, CStr};

use crate::section::FrameSectionId;
use crate::time;
use crate::{CreateInfo, GlobalProfiler, Timestamp};

const INVALID_SECTION: FrameSectionId = FrameSectionId {
    id: u32::MAX,
    sub_frame: 0,
    frame: u64::MAX,
};

#[no_mangle]
pub unsafe extern "C" fn tlpTimestampNow() -> Timestamp {
    time::now()
}

#[cfg(target_os = "windows")]
#[no_mangle]
pub unsafe extern "C" fn tlpTimestampFromQpc(qpc: u64) -> Timestamp {
    time::timestamp_from_qpc(qpc)
}

/// `name` may be null for the default timeline name.
#[no_mangle]
pub unsafe extern "C" fn tlpGlobalInit(name: *const c_char) -> bool {
    let info = if name.is_null() {
        CreateInfo::default()
    } else {
        CreateInfo::with_name(CStr::from_ptr(name).to_string_lossy())
    };
    match GlobalProfiler::init_with(info) {
        Ok(()) => true,
        Err(err) => {
            log::warn!("failed to initialize the global profiler: {err}");
            false
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn tlpGlobalShutdown() {
    GlobalProfiler::shutdown();
}

#[no_mangle]
pub unsafe extern "C" fn tlpFrameAdvance() {
    if let Some(timeline) = GlobalProfiler::timeline() {
        timeline.frame_advance();
    }
}

#[no_mangle]
pub unsafe extern "C" fn tlpFrameBeginSection(name: *const c_char) -> FrameSectionId {
    match GlobalProfiler::timeline() {
        Some(timeline) if !name.is_null() => {
            timeline.frame_begin_section(&CStr::from_ptr(name).to_string_lossy(), None)
        }
        _ => INVALID_SECTION,
    }
}

#[no_mangle]
pub unsafe extern "C" fn tlpFrameEndSection(section: FrameSectionId) {
    if section == INVALID_SECTION {
        return;
    }
    if let Some(timeline) = GlobalProfiler::timeline() {
        timeline.frame_end_section(section);
    }
}
