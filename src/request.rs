//! Render request identities and outcomes

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Resolution of one enqueued unit of render work.
///
/// Supersession and cancellation are ordinary outcomes, not errors: a newer
/// request making an older one irrelevant is the normal mode of operation
/// while the viewport is moving.
#[derive(Debug)]
pub enum RenderOutcome<T> {
    /// The work ran to completion
    Completed(T),
    /// A newer request replaced this one before it could run
    Superseded,
    /// The request was withdrawn before it started
    Cancelled,
}
