//! Id Generator
#[cfg(any(test, feature = "testing"))]
pub use increment::IncrementIdGenerator;

use crate::trace::{SpanId, TraceId};
use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;

/// Interface for generating IDs
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TraceId`
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`] implementation.
///
/// Generates Trace and Span ids using a random number generator. Neither id
/// is ever zero.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().random_range(1..=u128::MAX)))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from_u64(rng.borrow_mut().random_range(1..=u64::MAX)))
    }
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

/// Runs `f` with this thread's random number generator.
pub(crate) fn with_rng<T>(f: impl FnOnce(&mut rngs::SmallRng) -> T) -> T {
    CURRENT_RNG.with(|rng| f(&mut rng.borrow_mut()))
}

#[cfg(any(test, feature = "testing"))]
mod increment {
    use crate::trace::{IdGenerator, SpanId, TraceId};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// [`IdGenerator`] implementation that increments a counter for each new ID. This helps produce
    /// predictable IDs for testing.
    #[derive(Clone, Debug)]
    pub struct IncrementIdGenerator(Arc<AtomicU64>);

    impl IncrementIdGenerator {
        /// Create a new [`IncrementIdGenerator`]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Default for IncrementIdGenerator {
        fn default() -> Self {
            Self(Arc::new(AtomicU64::new(1)))
        }
    }

    impl IdGenerator for IncrementIdGenerator {
        fn new_trace_id(&self) -> TraceId {
            TraceId::from(self.0.fetch_add(1, Ordering::SeqCst) as u128)
        }

        fn new_span_id(&self) -> SpanId {
            SpanId::from_u64(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_ids_are_non_zero_and_distinct() {
        let generator = RandomIdGenerator::default();
        let trace_ids: HashSet<_> = (0..100).map(|_| generator.new_trace_id()).collect();
        let span_ids: HashSet<_> = (0..100).map(|_| generator.new_span_id()).collect();

        assert_eq!(trace_ids.len(), 100);
        assert_eq!(span_ids.len(), 100);
        assert!(!trace_ids.contains(&TraceId::INVALID));
        assert!(span_ids.iter().all(|id| id.to_u64() != Some(0)));
    }

    #[test]
    fn trace_ids_render_as_32_hex_digits() {
        let rendered = RandomIdGenerator::default().new_trace_id().to_string();
        assert_eq!(rendered.len(), 32);
        assert!(rendered
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    }

    #[test]
    fn increment_generator_is_predictable() {
        let generator = IncrementIdGenerator::new();
        assert_eq!(generator.new_trace_id(), TraceId::from(1));
        assert_eq!(generator.new_span_id().as_str(), "2");
        assert_eq!(generator.clone().new_span_id().as_str(), "3");
    }
}
