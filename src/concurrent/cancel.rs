use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Error returned when a wait was abandoned because its [`CancelToken`]
/// fired before the outcome was decided.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("wait cancelled by stop signal")]
pub struct Cancelled;

/// Cooperative stop signal for blocked threads.
///
/// Cancellation is sticky and level-triggered. It is observed only at the
/// documented suspension points: a primitive checks the token after every
/// wake, never asynchronously mid-computation. While a thread is parked it
/// registers its condvar here so that [`CancelToken::cancel`] actually wakes
/// it, mirroring what thread interruption does for a condition wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  cancelled: AtomicBool,
  parked: Mutex<Vec<Weak<Condvar>>>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the flag and wakes every currently parked waiter observing this
  /// token.
  pub fn cancel(&self) {
    self.inner.cancelled.store(true, Ordering::Release);
    let mut parked = self.inner.parked.lock();
    for waiter in parked.drain(..) {
      if let Some(cond) = waiter.upgrade() {
        cond.notify_all();
      }
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.cancelled.load(Ordering::Acquire)
  }

  /// Registers `cond` as the wake target of a wait that is about to park.
  /// The registration is dropped when the returned guard goes out of scope.
  pub(crate) fn watch(&self, cond: &Arc<Condvar>) -> CancelWatch<'_> {
    self.inner.parked.lock().push(Arc::downgrade(cond));
    CancelWatch {
      token: self,
      cond: Arc::downgrade(cond),
    }
  }
}

pub(crate) struct CancelWatch<'a> {
  token: &'a CancelToken,
  cond: Weak<Condvar>,
}

impl Drop for CancelWatch<'_> {
  fn drop(&mut self) {
    let mut parked = self.token.inner.parked.lock();
    if let Some(position) = parked.iter().position(|w| w.ptr_eq(&self.cond)) {
      parked.swap_remove(position);
    }
  }
}

static_assertions::assert_impl_all!(CancelToken: Send, Sync);

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Condvar;

  use super::CancelToken;

  #[test]
  fn test_cancel_is_sticky() {
    let token = CancelToken::new();
    assert!(!token.is_cancelled());
    token.cancel();
    assert!(token.is_cancelled());
    token.cancel();
    assert!(token.is_cancelled());
  }

  #[test]
  fn test_watch_registration_is_dropped_with_guard() {
    let token = CancelToken::new();
    let cond = Arc::new(Condvar::new());
    {
      let _watch = token.watch(&cond);
      assert_eq!(token.inner.parked.lock().len(), 1);
    }
    assert_eq!(token.inner.parked.lock().len(), 0);
  }
}
