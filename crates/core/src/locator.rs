//! Cached object location with retry cooldown
//!
//! Scene-object searches are expensive and usually fail for the same reason
//! many frames in a row (the scene has not loaded yet). A [`Locator`] caches
//! the first hit and, after a miss, refuses to search again until the
//! cooldown elapses, so a missing object costs one lookup per cooldown
//! window instead of one per frame. A cached hit is not trusted forever
//! either: once per cooldown the search re-runs to confirm the object is
//! still in the scene, and a handle that no longer resolves is dropped.

use std::time::{Duration, Instant};

/// Default retry cooldown after a failed search, and the interval between
/// liveness re-checks of a cached handle.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

pub struct Locator<T> {
    name: &'static str,
    /// Fallback search names tried in order after `name`.
    alternates: &'static [&'static str],
    cooldown: Duration,
    cached: Option<T>,
    /// When the cached handle last resolved through a real search.
    last_check: Option<Instant>,
    last_miss: Option<Instant>,
}

impl<T: Copy> Locator<T> {
    pub fn new(name: &'static str, alternates: &'static [&'static str]) -> Self {
        Self::with_cooldown(name, alternates, DEFAULT_COOLDOWN)
    }

    pub fn with_cooldown(
        name: &'static str,
        alternates: &'static [&'static str],
        cooldown: Duration,
    ) -> Self {
        Locator {
            name,
            alternates,
            cooldown,
            cached: None,
            last_check: None,
            last_miss: None,
        }
    }

    /// Return the cached handle, or run `search` over the candidate names.
    ///
    /// A fresh cached hit is returned without searching. Once the cooldown
    /// has elapsed since the last real search the handle is revalidated:
    /// the search re-runs, a new hit replaces the cache, and a miss drops
    /// it (a destroyed object must not be operated on just because its
    /// pages are still mapped).
    pub fn get(&mut self, search: impl FnMut(&'static str) -> Option<T>) -> Option<T> {
        self.get_at(Instant::now(), search)
    }

    pub(crate) fn get_at(
        &mut self,
        now: Instant,
        mut search: impl FnMut(&'static str) -> Option<T>,
    ) -> Option<T> {
        if let Some(handle) = self.cached {
            let fresh = self
                .last_check
                .is_some_and(|at| now.saturating_duration_since(at) < self.cooldown);
            if fresh {
                return Some(handle);
            }
        } else if let Some(miss) = self.last_miss {
            if now.saturating_duration_since(miss) < self.cooldown {
                return None;
            }
        }
        for candidate in std::iter::once(self.name).chain(self.alternates.iter().copied()) {
            if let Some(handle) = search(candidate) {
                tracing::debug!(name = self.name, candidate, "located object");
                self.cached = Some(handle);
                self.last_check = Some(now);
                self.last_miss = None;
                return Some(handle);
            }
        }
        if self.cached.take().is_some() {
            tracing::debug!(name = self.name, "cached object left the scene, dropped");
        } else {
            tracing::debug!(
                name = self.name,
                cooldown_secs = self.cooldown.as_secs(),
                "object not found, backing off"
            );
        }
        self.last_check = None;
        self.last_miss = Some(now);
        None
    }

    /// Drop the cached handle; the next [`get`](Self::get) searches again
    /// immediately.
    pub fn invalidate(&mut self) {
        self.cached = None;
        self.last_check = None;
        self.last_miss = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }
}

/// Retry gate for repeatable setup work: the first attempt is always
/// allowed, then at most one per cooldown window.
pub struct Backoff {
    cooldown: Duration,
    last_attempt: Option<Instant>,
}

impl Backoff {
    pub fn new(cooldown: Duration) -> Self {
        Backoff {
            cooldown,
            last_attempt: None,
        }
    }

    pub fn should_attempt(&mut self) -> bool {
        self.should_attempt_at(Instant::now())
    }

    pub(crate) fn should_attempt_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_attempt = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_hit_is_cached() {
        let mut loc: Locator<u32> = Locator::new("Player", &[]);
        let searches = Cell::new(0);
        for _ in 0..5 {
            let got = loc.get(|_| {
                searches.set(searches.get() + 1);
                Some(7)
            });
            assert_eq!(got, Some(7));
        }
        assert_eq!(searches.get(), 1);
    }

    #[test]
    fn test_miss_backs_off_until_cooldown() {
        let mut loc: Locator<u32> =
            Locator::with_cooldown("EnemyController", &[], Duration::from_secs(3));
        let t0 = Instant::now();
        let searches = Cell::new(0);
        let miss = |_: &'static str| {
            searches.set(searches.get() + 1);
            None::<u32>
        };

        assert_eq!(loc.get_at(t0, miss), None);
        assert_eq!(loc.get_at(t0 + Duration::from_millis(500), miss), None);
        assert_eq!(loc.get_at(t0 + Duration::from_secs(2), miss), None);
        assert_eq!(searches.get(), 1);

        assert_eq!(loc.get_at(t0 + Duration::from_secs(4), miss), None);
        assert_eq!(searches.get(), 2);
    }

    #[test]
    fn test_cached_handle_revalidated_after_cooldown() {
        let mut loc: Locator<u32> =
            Locator::with_cooldown("Player", &[], Duration::from_secs(3));
        let t0 = Instant::now();
        let searches = Cell::new(0);

        let found = |_: &'static str| {
            searches.set(searches.get() + 1);
            Some(7)
        };
        assert_eq!(loc.get_at(t0, found), Some(7));
        // Within the cooldown the cache answers without searching.
        assert_eq!(loc.get_at(t0 + Duration::from_secs(1), found), Some(7));
        assert_eq!(searches.get(), 1);

        // Past the cooldown the handle must prove it is still live.
        assert_eq!(loc.get_at(t0 + Duration::from_secs(4), found), Some(7));
        assert_eq!(searches.get(), 2);
    }

    #[test]
    fn test_stale_handle_dropped_when_revalidation_misses() {
        let mut loc: Locator<u32> =
            Locator::with_cooldown("Player", &[], Duration::from_secs(3));
        let t0 = Instant::now();
        let searches = Cell::new(0);

        assert_eq!(loc.get_at(t0, |_| Some(7)), Some(7));

        // The object is gone by the next liveness check.
        let gone = |_: &'static str| {
            searches.set(searches.get() + 1);
            None::<u32>
        };
        assert_eq!(loc.get_at(t0 + Duration::from_secs(4), gone), None);
        assert!(!loc.is_cached());

        // The miss backs off like any other.
        assert_eq!(loc.get_at(t0 + Duration::from_secs(5), gone), None);
        assert_eq!(searches.get(), 1);
    }

    #[test]
    fn test_alternates_tried_in_order() {
        let mut loc: Locator<u32> = Locator::new("EnemyController", &["Enemy Controller"]);
        let mut tried = Vec::new();
        let got = loc.get(|name| {
            tried.push(name);
            (name == "Enemy Controller").then_some(1)
        });
        assert_eq!(got, Some(1));
        assert_eq!(tried, vec!["EnemyController", "Enemy Controller"]);
    }

    #[test]
    fn test_backoff_allows_one_attempt_per_window() {
        let mut gate = Backoff::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(gate.should_attempt_at(t0));
        assert!(!gate.should_attempt_at(t0 + Duration::from_millis(200)));
        assert!(!gate.should_attempt_at(t0 + Duration::from_millis(900)));
        assert!(gate.should_attempt_at(t0 + Duration::from_secs(2)));
        assert!(!gate.should_attempt_at(t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_invalidate_searches_again() {
        let mut loc: Locator<u32> = Locator::new("Player", &[]);
        assert_eq!(loc.get(|_| Some(1)), Some(1));
        loc.invalidate();
        assert!(!loc.is_cached());
        assert_eq!(loc.get(|_| Some(2)), Some(2));
    }
}
