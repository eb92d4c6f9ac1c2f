use std::num::NonZeroU64;

use once_cell::sync::Lazy;
use windows::Win32::System::Performance::{QueryPerformanceCounter, QueryPerformanceFrequency};

use crate::Timestamp;

pub fn timestamp_from_qpc(qpc: u64) -> Timestamp {
    static QPF: Lazy<NonZeroU64> = Lazy::new(|| {
        let mut qpf = 0i64;
        unsafe {
            QueryPerformanceFrequency(&mut qpf);
        }
        NonZeroU64::new(qpf as u64).expect("QueryPerformanceFrequency returned zero")
    });

    let denom = 1_000_000_000;
    let whole = qpc / QPF.get() * denom;
    let part = qpc % QPF.get() * denom / QPF.get();
    (whole + part) as _
}

pub fn timestamp_now() -> Timestamp {
    let mut qpc = 0i64;
    unsafe {
        QueryPerformanceCounter(&mut qpc);
    }
    timestamp_from_qpc(qpc as u64)
}
