use crate::Timestamp;
use nix::sys::time::TimeValLike;
use nix::time::{clock_gettime, ClockId};

pub fn timestamp_now() -> Timestamp {
    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).expect("CLOCK_MONOTONIC is unavailable");
    ts.num_nanoseconds() as _
}
