//! Cursor broadcast - one emitter, many listening panels
//!
//! Replaces a GUI signal/slot bridge with an explicit observer list: a single
//! event type ("cursor moved to (x, y)"), listeners registered with
//! [`CursorTracker::subscribe`], and a 60 events/second rate limit on
//! delivery. The last position always wins; intermediate positions dropped by
//! the limiter are still observable through [`CursorTracker::last_position`].

use instant::{Duration, Instant};

/// Broadcast rate limit
const MAX_EVENTS_PER_SECOND: u64 = 60;

/// Cursor position in local metric coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CursorPosition {
    /// Easting in meters
    pub x: f64,
    /// Northing in meters
    pub y: f64,
}

/// Handle for removing a registered listener
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(CursorPosition) + Send>;

/// Shared cursor state broadcaster
pub struct CursorTracker {
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
    min_interval: Option<Duration>,
    last_delivery: Option<Instant>,
    last_position: Option<CursorPosition>,
}

impl std::fmt::Debug for CursorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorTracker")
            .field("listeners", &self.listeners.len())
            .field("min_interval", &self.min_interval)
            .field("last_position", &self.last_position)
            .finish()
    }
}

impl Default for CursorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorTracker {
    /// Tracker with the standard 60 events/second delivery limit
    pub fn new() -> Self {
        Self::with_min_interval(Some(Duration::from_micros(
            1_000_000 / MAX_EVENTS_PER_SECOND,
        )))
    }

    /// Tracker without rate limiting; every event is delivered
    pub fn unthrottled() -> Self {
        Self::with_min_interval(None)
    }

    fn with_min_interval(min_interval: Option<Duration>) -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
            min_interval,
            last_delivery: None,
            last_position: None,
        }
    }

    /// Register a listener; delivery order follows registration order
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(CursorPosition) + Send + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() < before
    }

    /// Broadcast a cursor move to all listeners
    ///
    /// Returns `true` if the event was delivered, `false` if the rate limiter
    /// dropped it. The tracked position is updated either way.
    pub fn cursor_moved(&mut self, position: CursorPosition) -> bool {
        self.last_position = Some(position);

        if let (Some(min_interval), Some(last)) = (self.min_interval, self.last_delivery)
            && last.elapsed() < min_interval
        {
            return false;
        }

        self.last_delivery = Some(Instant::now());
        for (_, listener) in &mut self.listeners {
            listener(position);
        }
        true
    }

    /// Most recently observed position, delivered or not
    #[inline]
    pub fn last_position(&self) -> Option<CursorPosition> {
        self.last_position
    }

    /// Number of registered listeners
    #[inline]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
