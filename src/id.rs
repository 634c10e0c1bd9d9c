use std::{
    fmt,
    str::FromStr,
    sync::{Mutex, PoisonError},
};

use thiserror::Error;
use ulid::{Generator, MonotonicError, Ulid};

/// Identifier of one compaction run.
///
/// Rendered as a 26 character Crockford base32 ULID, so string order matches
/// creation order and ids minted by separate processes in the same
/// millisecond still differ through their 80 random bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(Ulid);

impl RunId {
    /// Milliseconds since the Unix epoch encoded in the id.
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RunId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(RunId)
    }
}

/// Failure to mint a run id.
#[derive(Debug, Error)]
pub enum RunIdError {
    /// The monotonic generator ran out of entropy within one millisecond.
    #[error("run id generator overflowed: {0}")]
    Overflow(#[from] MonotonicError),
}

/// Thread-safe ULID generator for run ids.
pub struct RunIdGenerator {
    inner: Mutex<Generator>,
}

impl RunIdGenerator {
    /// Create a new generator seeded with the current time.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Produce the next [`RunId`] in a monotonic, time-ordered sequence.
    pub fn generate(&self) -> Result<RunId, RunIdError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(RunId(guard.generate()?))
    }
}

impl Default for RunIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunIdGenerator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{RunId, RunIdGenerator};

    #[test]
    fn ids_in_the_same_millisecond_are_distinct_and_ordered() {
        let generator = RunIdGenerator::new();
        let ids: Vec<RunId> = (0..1_000).map(|_| generator.generate().unwrap()).collect();

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let mut sorted = rendered.clone();
        sorted.sort();
        assert_eq!(rendered, sorted);
    }

    #[test]
    fn independent_generators_do_not_collide() {
        let a = RunIdGenerator::new().generate().unwrap();
        let b = RunIdGenerator::new().generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn display_round_trips_through_from_str() {
        let id = RunIdGenerator::new().generate().unwrap();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_string().len(), 26);
    }
}
