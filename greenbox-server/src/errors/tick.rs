use time::OffsetDateTime;

/// Reasons a greenhouse tick was abandoned; the next tick starts clean.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TickError {
    #[error("Telemetry store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Tick at {at} is older than the last tick at {last}")]
    Stale { at: OffsetDateTime, last: OffsetDateTime },
}
