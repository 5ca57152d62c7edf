//! Seam between the multiplexer and the upstream feed client

/// Requests the multiplexer issues to the upstream stream.
///
/// Implementations must only enqueue: the multiplexer calls these while holding
/// its state lock so the upstream sees subscribe and unsubscribe requests in the
/// same order the reference counts changed. Resolution, network writes and
/// retries happen on the implementation's own task.
pub trait UpstreamFeed: Send + Sync {
    /// Symbols whose reference count went from zero to one
    fn subscribe(&self, symbols: Vec<String>);

    /// Symbols whose reference count dropped back to zero
    fn unsubscribe(&self, symbols: Vec<String>);

    /// Stop the stream for good. No reconnects follow.
    fn disconnect(&self);
}
