//! Cross-layer error classification

/// Classification hook consumed by the circuit breakers.
///
/// A breaker only counts an error as a failure when it is transient: lost
/// connections, timeouts, pool exhaustion. Not-found lookups and caller
/// mistakes (bad config, undeserializable payloads) must not trip a breaker.
pub trait TransientError {
    fn is_transient(&self) -> bool;
}
