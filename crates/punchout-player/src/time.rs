//! Conversions between caller ticks (microseconds) and engine ticks (nanoseconds).

/// Caller-facing timestamps tick at 1 MHz.
pub const CALLER_TICKS_PER_SECOND: i64 = 1_000_000;
/// Engine timestamps tick at 1 GHz.
pub const ENGINE_TICKS_PER_SECOND: i64 = 1_000_000_000;

const SCALE: i64 = ENGINE_TICKS_PER_SECOND / CALLER_TICKS_PER_SECOND;

/// Convert caller microseconds to engine nanoseconds, saturating at the `i64` range.
pub fn to_engine_time(caller: i64) -> i64 {
    caller.saturating_mul(SCALE)
}

/// Convert engine nanoseconds to caller microseconds, truncating toward zero.
pub fn to_caller_time(engine: i64) -> i64 {
    engine / SCALE
}
