use std::time::{Duration, Instant};

use parking_lot::{Condvar, MutexGuard};

/// Wait budget accepted by every blocking operation in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
  /// Give up immediately if the fast path does not succeed.
  NoWait,
  /// Wait until the duration elapses.
  Bounded(Duration),
  /// Wait until the operation completes or is cancelled.
  Infinite,
}

impl Timeout {
  pub fn millis(millis: u64) -> Self {
    Timeout::Bounded(Duration::from_millis(millis))
  }

  /// Returns whether this budget forbids waiting at all. A bounded zero
  /// duration counts as no-wait.
  pub fn is_no_wait(&self) -> bool {
    match self {
      Timeout::NoWait => true,
      Timeout::Bounded(duration) => duration.is_zero(),
      Timeout::Infinite => false,
    }
  }
}

/// An absolute point in time after which a wait gives up.
///
/// Computed once when a wait begins and re-checked after every wake, so
/// spurious or unrelated wakeups never extend the effective wait.
#[derive(Debug, Clone, Copy)]
pub enum Deadline {
  At(Instant),
  Never,
}

impl Deadline {
  pub fn start(timeout: Timeout) -> Self {
    match timeout {
      Timeout::NoWait => Deadline::At(Instant::now()),
      Timeout::Bounded(duration) => match Instant::now().checked_add(duration) {
        Some(at) => Deadline::At(at),
        None => Deadline::Never,
      },
      Timeout::Infinite => Deadline::Never,
    }
  }

  /// Time left before expiry; `None` for a deadline that never expires.
  /// Monotonically non-increasing as observed by any thread.
  pub fn remaining(&self) -> Option<Duration> {
    match self {
      Deadline::At(at) => Some(at.saturating_duration_since(Instant::now())),
      Deadline::Never => None,
    }
  }

  pub fn is_expired(&self) -> bool {
    match self {
      Deadline::At(at) => Instant::now() >= *at,
      Deadline::Never => false,
    }
  }

  pub fn instant(&self) -> Option<Instant> {
    match self {
      Deadline::At(at) => Some(*at),
      Deadline::Never => None,
    }
  }
}

/// Parks the calling thread on `cond` until a wake or until the deadline.
/// Callers re-check their predicate, the cancel token and the deadline after
/// every return.
pub(crate) fn park<T>(deadline: &Deadline, cond: &Condvar, guard: &mut MutexGuard<'_, T>) {
  match deadline.instant() {
    Some(at) => {
      let _ = cond.wait_until(guard, at);
    }
    None => cond.wait(guard),
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::{Deadline, Timeout};

  #[test]
  fn test_no_wait_detection() {
    assert!(Timeout::NoWait.is_no_wait());
    assert!(Timeout::Bounded(Duration::ZERO).is_no_wait());
    assert!(!Timeout::millis(1).is_no_wait());
    assert!(!Timeout::Infinite.is_no_wait());
  }

  #[test]
  fn test_bounded_deadline_expires() {
    let deadline = Deadline::start(Timeout::millis(10));
    assert!(!deadline.is_expired());
    std::thread::sleep(Duration::from_millis(20));
    assert!(deadline.is_expired());
    assert_eq!(deadline.remaining(), Some(Duration::ZERO));
  }

  #[test]
  fn test_infinite_deadline_never_expires() {
    let deadline = Deadline::start(Timeout::Infinite);
    assert!(!deadline.is_expired());
    assert_eq!(deadline.remaining(), None);
    assert_eq!(deadline.instant(), None);
  }

  #[test]
  fn test_remaining_is_monotonically_non_increasing() {
    let deadline = Deadline::start(Timeout::millis(50));
    let first = deadline.remaining().unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let second = deadline.remaining().unwrap();
    assert!(second <= first);
  }
}
