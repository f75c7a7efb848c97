use chrono::{DateTime, Utc};

/// A committed fact about stock.
///
/// Published payloads are serialized with the `event_type` and `version` in
/// the envelope, so consumers can route on the name and upgrade old shapes.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, e.g. `"inventory.stock.reserved"`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version, starting at 1.
    fn version(&self) -> u32;

    /// Business time of the change, not the time it was written.
    fn occurred_at(&self) -> DateTime<Utc>;
}
