//! Explicit lifecycle for mutations applied before the server confirms them.

/// Where a mutation on a single item stands.
///
/// `Pending` doubles as the in-flight flag: a second mutation of the same
/// item is refused until the first one commits or rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Pending,
    Committed,
    RolledBack,
}

impl Phase {
    pub fn is_pending(&self) -> bool {
        matches!(self, Phase::Pending)
    }
}

/// Returned when a mutation is started while another one is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyPending;

/// A value that can be changed optimistically and restored exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimistic<T: Clone> {
    value: T,
    snapshot: Option<T>,
    phase: Phase,
}

impl<T: Clone> Optimistic<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            snapshot: None,
            phase: Phase::Idle,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.phase.is_pending()
    }

    /// Applies `next` locally and remembers the previous value.
    pub fn begin(&mut self, next: T) -> Result<(), AlreadyPending> {
        if self.phase.is_pending() {
            return Err(AlreadyPending);
        }
        self.snapshot = Some(std::mem::replace(&mut self.value, next));
        self.phase = Phase::Pending;
        Ok(())
    }

    /// Server accepted the change; the optimistic value stands.
    pub fn commit(&mut self) {
        if self.phase.is_pending() {
            self.snapshot = None;
            self.phase = Phase::Committed;
        }
    }

    /// Server rejected the change; restore the value from before `begin`.
    pub fn rollback(&mut self) {
        if let Some(previous) = self.snapshot.take() {
            self.value = previous;
            self.phase = Phase::RolledBack;
        }
    }

    /// Overwrite with server truth. Ignored while a mutation is in flight.
    pub fn reset(&mut self, value: T) -> bool {
        if self.phase.is_pending() {
            return false;
        }
        self.value = value;
        self.phase = Phase::Idle;
        true
    }
}
