use std::fmt;

/// Wake signals consumed by the main event loop.
///
/// Signals carry no payload; data travels through the scheduled task queue or
/// through collaborator-owned queues (outbound audio, last wake word).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MainEvent {
    NetworkError,
    SendAudioReady,
    WakeWordDetected,
    VadChanged,
    ScheduledTasks,
    ClockTick,
}

impl MainEvent {
    /// Order in which one wake of the loop handles its signals.
    pub const PRIORITY: [MainEvent; 6] = [
        MainEvent::NetworkError,
        MainEvent::SendAudioReady,
        MainEvent::WakeWordDetected,
        MainEvent::VadChanged,
        MainEvent::ScheduledTasks,
        MainEvent::ClockTick,
    ];

    const fn mask(self) -> u8 {
        1 << (self as u8)
    }
}

/// Coalesced set of pending [`MainEvent`]s.
///
/// Raising an event that is already pending is a no-op, so a burst of
/// identical signals between two loop iterations is handled once.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct EventSet(u8);

impl EventSet {
    pub const EMPTY: EventSet = EventSet(0);

    pub fn insert(&mut self, event: MainEvent) {
        self.0 |= event.mask();
    }

    pub fn contains(self, event: MainEvent) -> bool {
        self.0 & event.mask() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Moves every pending event out, leaving the set empty.
    pub fn take(&mut self) -> EventSet {
        std::mem::take(self)
    }

    /// Iterates the pending events in [`MainEvent::PRIORITY`] order.
    pub fn iter(self) -> impl Iterator<Item = MainEvent> {
        MainEvent::PRIORITY
            .into_iter()
            .filter(move |event| self.contains(*event))
    }
}

impl From<MainEvent> for EventSet {
    fn from(event: MainEvent) -> Self {
        EventSet(event.mask())
    }
}

impl FromIterator<MainEvent> for EventSet {
    fn from_iter<I: IntoIterator<Item = MainEvent>>(iter: I) -> Self {
        let mut set = EventSet::EMPTY;
        for event in iter {
            set.insert(event);
        }
        set
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_in_priority_order_regardless_of_insertion() {
        let set: EventSet = [
            MainEvent::ClockTick,
            MainEvent::ScheduledTasks,
            MainEvent::NetworkError,
            MainEvent::WakeWordDetected,
        ]
        .into_iter()
        .collect();

        let order: Vec<_> = set.iter().collect();
        assert_eq!(
            order,
            vec![
                MainEvent::NetworkError,
                MainEvent::WakeWordDetected,
                MainEvent::ScheduledTasks,
                MainEvent::ClockTick,
            ]
        );
    }

    #[test]
    fn repeated_signals_coalesce() {
        let mut set = EventSet::EMPTY;
        set.insert(MainEvent::ClockTick);
        set.insert(MainEvent::ClockTick);
        assert_eq!(set.iter().count(), 1);

        let taken = set.take();
        assert!(set.is_empty());
        assert!(taken.contains(MainEvent::ClockTick));
        assert!(!taken.contains(MainEvent::VadChanged));
    }
}
