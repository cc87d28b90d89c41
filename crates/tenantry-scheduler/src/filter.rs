use crate::types::{FilterResult, PoolState};
use tracing::debug;

/// Per-request inputs to the eligibility filters
#[derive(Debug, Clone, Copy)]
pub struct FilterContext {
    /// Tenants the caller wants to place together
    pub batch_size: i64,
}

impl FilterContext {
    pub fn new(batch_size: i64) -> Self {
        Self { batch_size }
    }
}

/// Filter predicate trait
pub trait FilterPredicate: Send + Sync {
    /// Decide whether a pool may receive the batch
    fn filter(&self, context: &FilterContext, pool: &PoolState) -> FilterResult;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Pools with zero weight are never placement targets
pub struct HasWeight;

impl FilterPredicate for HasWeight {
    fn filter(&self, _context: &FilterContext, pool: &PoolState) -> FilterResult {
        if pool.handle.weight <= 0 {
            return FilterResult::fail(pool.handle.id, "Pool has zero weight".to_string());
        }
        FilterResult::pass(pool.handle.id)
    }

    fn name(&self) -> &str {
        "HasWeight"
    }
}

/// Pools under maintenance are skipped
pub struct NotLocked;

impl FilterPredicate for NotLocked {
    fn filter(&self, _context: &FilterContext, pool: &PoolState) -> FilterResult {
        if pool.locked {
            return FilterResult::fail(pool.handle.id, "Pool is locked".to_string());
        }
        FilterResult::pass(pool.handle.id)
    }

    fn name(&self) -> &str {
        "NotLocked"
    }
}

/// The whole batch must fit under the pool ceiling
pub struct HasRoomFor;

impl FilterPredicate for HasRoomFor {
    fn filter(&self, context: &FilterContext, pool: &PoolState) -> FilterResult {
        let handle = &pool.handle;

        if !handle.has_room_for(context.batch_size) {
            debug!(
                "Pool {} has {:?} remaining, batch needs {}",
                handle.id,
                handle.remaining(),
                context.batch_size
            );
            return FilterResult::fail(
                handle.id,
                format!(
                    "Insufficient room: requested {}, available {}",
                    context.batch_size,
                    handle.remaining().unwrap_or_default()
                ),
            );
        }

        FilterResult::pass(handle.id)
    }

    fn name(&self) -> &str {
        "HasRoomFor"
    }
}

/// Get default filter predicates
pub fn default_filters() -> Vec<Box<dyn FilterPredicate>> {
    vec![Box::new(HasWeight), Box::new(HasRoomFor), Box::new(NotLocked)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::PoolHandle;

    #[test]
    fn test_has_weight() {
        let context = FilterContext::new(1);

        let pool = PoolState::unlocked(PoolHandle::new(1, 0, 0, 10));
        assert!(!HasWeight.filter(&context, &pool).passed);

        let pool = PoolState::unlocked(PoolHandle::new(1, 100, 0, 10));
        assert!(HasWeight.filter(&context, &pool).passed);
    }

    #[test]
    fn test_not_locked() {
        let context = FilterContext::new(1);

        let pool = PoolState::new(PoolHandle::new(1, 100, 0, 10), true);
        let result = NotLocked.filter(&context, &pool);
        assert!(!result.passed);
        assert_eq!(result.reason, Some("Pool is locked".to_string()));
    }

    #[test]
    fn test_has_room_for_batch() {
        let pool = PoolState::unlocked(PoolHandle::new(1, 100, 7, 10));

        assert!(HasRoomFor.filter(&FilterContext::new(3), &pool).passed);

        let result = HasRoomFor.filter(&FilterContext::new(4), &pool);
        assert!(!result.passed);
        assert!(result.reason.unwrap().contains("available 3"));

        let open = PoolState::unlocked(PoolHandle::unbounded(2, 100, 1_000_000));
        assert!(HasRoomFor.filter(&FilterContext::new(1_000), &open).passed);
    }
}
