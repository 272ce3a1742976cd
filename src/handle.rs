//! Data-model newtypes: client identity and queue item handles.

use std::fmt;

use rand::Rng;

/// Per-instance random non-negative integer proving ownership of a key.
/// Equality of this token is the sole proof of ownership the scripts
/// recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Draw a fresh client identity from `rng`. Callers that need
    /// reproducible ownership assertions in tests should construct this
    /// from a seeded RNG.
    pub fn generate(rng: &mut impl Rng) -> Self {
        ClientId(rng.random())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The tombstone value permanently marking a consumed queue item. Never
/// compared against directly by callers; only the script invoker inspects
/// it, and only to translate it into the `AlreadyCompleted` signal.
pub(crate) const COMPLETED: &str = "completed";

/// A queue item handle, `"<priority>:<insert_time>:<payload>"`.
///
/// Splitting is positional on the first two colons only, so `payload` may
/// itself contain colons without corrupting the parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(String);

impl Handle {
    /// Build a handle for `payload` at the given `priority`, stamped with
    /// the wall-clock insertion time (seconds since the Unix epoch, with
    /// sub-second resolution, matching the Python `time.time()` source).
    pub fn new(priority: i64, insert_time: f64, payload: &str) -> Self {
        Handle(format!("{priority}:{insert_time:.6}:{payload}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(priority, insert_time, payload)`. Only ever splits on
    /// the first two colons, so a payload with embedded colons round-trips.
    pub fn parse(&self) -> Option<(i64, f64, &str)> {
        let mut parts = self.0.splitn(3, ':');
        let priority = parts.next()?.parse().ok()?;
        let insert_time = parts.next()?.parse().ok()?;
        let payload = parts.next()?;
        Some((priority, insert_time, payload))
    }

    pub fn payload(&self) -> &str {
        self.parse().map(|(_, _, payload)| payload).unwrap_or("")
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Handle {
    fn from(value: String) -> Self {
        Handle(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn handle_round_trips_a_payload_with_embedded_colons() {
        let h = Handle::new(100, 12345.5, "a:b:c");
        let (priority, insert_time, payload) = h.parse().expect("parses");
        assert_eq!(priority, 100);
        assert!((insert_time - 12345.5).abs() < 1e-6);
        assert_eq!(payload, "a:b:c");
    }

    #[test]
    fn handle_payload_without_colons() {
        let h = Handle::new(50, 1.0, "plain");
        assert_eq!(h.payload(), "plain");
    }

    proptest! {
        #[test]
        fn handle_round_trips_arbitrary_payloads(
            priority in -1000i64..1000,
            insert_time in 0.0f64..1_700_000_000.0,
            raw in proptest::collection::vec(any::<char>(), 0..=32),
        ) {
            let payload: String = raw.into_iter().collect();
            let h = Handle::new(priority, insert_time, &payload);
            let (parsed_priority, parsed_time, parsed_payload) = h.parse().expect("parses");
            prop_assert_eq!(parsed_priority, priority);
            prop_assert!((parsed_time - insert_time).abs() < 1e-4);
            prop_assert_eq!(parsed_payload, payload.as_str());
        }
    }
}
