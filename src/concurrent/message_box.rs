use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use crossbeam_utils::Backoff;

use crate::collections::Element;

/// A published value consumable a fixed number of times.
///
/// `publish` installs a fresh value with a consumption budget; `try_consume`
/// hands the value out while the budget lasts. Entirely lock-free: consuming
/// is a CAS retry loop on the budget counter, publishing is an atomic pointer
/// swap with epoch-deferred reclamation of the previous holder.
#[derive(Debug)]
pub struct MessageBox<M: Element> {
  holder: Atomic<MsgHolder<M>>,
}

#[derive(Debug)]
struct MsgHolder<M> {
  message: M,
  lives: AtomicUsize,
}

impl<M: Element + Clone> MessageBox<M> {
  pub fn new() -> Self {
    Self {
      holder: Atomic::null(),
    }
  }

  /// Replaces the current value and resets the consumption budget to
  /// `lives`.
  pub fn publish(&self, message: M, lives: usize) {
    let guard = epoch::pin();
    let new = Owned::new(MsgHolder {
      message,
      lives: AtomicUsize::new(lives),
    });
    let old = self.holder.swap(new, Ordering::AcqRel, &guard);
    if !old.is_null() {
      unsafe { guard.defer_destroy(old) };
    }
  }

  /// Returns the value iff the budget was strictly positive just before the
  /// decrement. Once it reaches zero every call returns `None`, however many
  /// threads race. Re-reads the holder on every retry, so a concurrent
  /// republish is honoured.
  pub fn try_consume(&self) -> Option<M> {
    let guard = epoch::pin();
    let backoff = Backoff::new();
    loop {
      let holder = self.holder.load(Ordering::Acquire, &guard);
      let holder = unsafe { holder.as_ref() }?;
      let lives = holder.lives.load(Ordering::Acquire);
      if lives == 0 {
        return None;
      }
      if holder
        .lives
        .compare_exchange(lives, lives - 1, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        return Some(holder.message.clone());
      }
      backoff.spin();
    }
  }
}

impl<M: Element + Clone> Default for MessageBox<M> {
  fn default() -> Self {
    Self::new()
  }
}

impl<M: Element> Drop for MessageBox<M> {
  fn drop(&mut self) {
    unsafe {
      let guard = epoch::unprotected();
      let holder = self.holder.load(Ordering::Relaxed, guard);
      if !holder.is_null() {
        drop(holder.into_owned());
      }
    }
  }
}

static_assertions::assert_impl_all!(MessageBox<String>: Send, Sync);
