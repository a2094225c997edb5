use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::collections::Element;
use crate::concurrent::cancel::{CancelToken, Cancelled};
use crate::concurrent::deadline::{park, Deadline, Timeout};

/// Pairs exactly two values submitted under the same key and hands each
/// submitter the other's value.
///
/// At most one unmatched slot exists per key at any time: the first arrival
/// registers it and parks, the second completes the match without waiting,
/// and later arrivals start a fresh cycle. All slot bookkeeping happens under
/// one exclusive lock per exchanger.
#[derive(Debug)]
pub struct KeyedExchanger<T: Element> {
  slots: Mutex<HashMap<u64, Arc<ExchangeSlot<T>>>>,
}

#[derive(Debug)]
struct ExchangeSlot<T> {
  wake: Arc<Condvar>,
  cell: Mutex<SlotCell<T>>,
}

#[derive(Debug)]
struct SlotCell<T> {
  my_data: Option<T>,
  other_data: Option<T>,
  matched: bool,
}

impl<T: Element> KeyedExchanger<T> {
  pub fn new() -> Self {
    Self {
      slots: Mutex::new(HashMap::new()),
    }
  }

  /// Offers `value` under `key` and waits for a partner, up to `timeout`.
  ///
  /// Returns `Ok(Some(other))` when matched, `Ok(None)` on timeout. A
  /// cancellation observed after the partner already landed still returns
  /// the matched value.
  pub fn exchange(&self, key: u64, value: T, timeout: Timeout, token: &CancelToken) -> Result<Option<T>, Cancelled> {
    let mut slots = self.slots.lock();

    // Fast path: a partner is already waiting under this key.
    if let Some(slot) = slots.remove(&key) {
      let mut cell = slot.cell.lock();
      let first = cell.my_data.take();
      cell.other_data = Some(value);
      cell.matched = true;
      drop(cell);
      slot.wake.notify_one();
      return Ok(first);
    }

    if timeout.is_no_wait() {
      return Ok(None);
    }

    let deadline = Deadline::start(timeout);
    let slot = Arc::new(ExchangeSlot {
      wake: Arc::new(Condvar::new()),
      cell: Mutex::new(SlotCell {
        my_data: Some(value),
        other_data: None,
        matched: false,
      }),
    });
    slots.insert(key, slot.clone());

    let _watch = token.watch(&slot.wake);
    loop {
      {
        let mut cell = slot.cell.lock();
        if cell.matched {
          return Ok(cell.other_data.take());
        }
      }
      if token.is_cancelled() {
        slots.remove(&key);
        return Err(Cancelled);
      }
      if deadline.is_expired() {
        slots.remove(&key);
        return Ok(None);
      }
      park(&deadline, &slot.wake, &mut slots);
    }
  }
}

impl<T: Element> Default for KeyedExchanger<T> {
  fn default() -> Self {
    Self::new()
  }
}

static_assertions::assert_impl_all!(KeyedExchanger<u64>: Send, Sync);
