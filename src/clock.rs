use fugit::MicrosDurationU32;

/// Microsecond timestamp of a sample
pub type Timestamp = fugit::TimerInstantU64<1_000_000>;

/// Time source used to stamp samples
///
/// Usually backed by a free running hardware timer. It must not go backwards between two calls
/// during a transfer, and it is read from interrupt context.
pub trait Clock {
    type Error: core::fmt::Debug;

    fn now(&mut self) -> Result<Timestamp, Self::Error>;
}

/// Builds a timestamp from the seconds/microseconds pair most timer drivers report
pub const fn timestamp(secs: u64, micros: u32) -> Timestamp {
    Timestamp::from_ticks(secs * 1_000_000 + micros as u64)
}

/// Whole seconds of a timestamp
pub const fn secs(t: Timestamp) -> u64 {
    t.ticks() / 1_000_000
}

/// Microseconds past the last whole second
pub const fn subsec_micros(t: Timestamp) -> u32 {
    (t.ticks() % 1_000_000) as u32
}

/// Time from `earlier` to `later`
///
/// Zero if `later` is before `earlier`, saturates at `u32::MAX` microseconds.
pub fn micros_between(earlier: Timestamp, later: Timestamp) -> MicrosDurationU32 {
    let ticks = later
        .checked_duration_since(earlier)
        .map_or(0, |d| d.ticks());
    MicrosDurationU32::from_ticks(u32::try_from(ticks).unwrap_or(u32::MAX))
}
