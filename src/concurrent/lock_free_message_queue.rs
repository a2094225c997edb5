use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::collections::{Element, LockFreeQueue};
use crate::concurrent::cancel::{CancelToken, Cancelled};
use crate::concurrent::deadline::{park, Deadline, Timeout};

// Pending-send states.
const PENDING: u8 = 0;
const SENT: u8 = 1;
const CANCELLED: u8 = 2;

// Parked-receiver states. A sender claims a receiver by CAS before writing
// its slot, so a value can never be handed to a waiter that already gave up.
const WAITING: u8 = 0;
const CLAIMED: u8 = 1;
const DELIVERED: u8 = 2;
const RETIRED: u8 = 3;

/// Message queue with the same external contract as
/// [`MessageQueue`](crate::concurrent::MessageQueue), but whose pending-send
/// and parked-receiver collections are [`LockFreeQueue`]s.
///
/// The `park` mutex and its condvar exist solely to put receiver threads to
/// sleep and wake them; they never guard the queue contents. Emptiness checks
/// are advisory lock-free peeks repeated in a loop until the deadline.
#[derive(Debug)]
pub struct LockFreeMessageQueue<T: Element> {
  shared: Arc<NbShared<T>>,
}

#[derive(Debug)]
struct NbShared<T: Element> {
  pending: LockFreeQueue<Arc<NbPendingSend<T>>>,
  receivers: LockFreeQueue<Arc<NbReceiver<T>>>,
  park: Mutex<()>,
  wake: Arc<Condvar>,
}

#[derive(Debug)]
struct NbPendingSend<T> {
  state: AtomicU8,
  message: Mutex<Option<T>>,
  park: Mutex<()>,
  delivered: Arc<Condvar>,
}

impl<T: Element> NbPendingSend<T> {
  fn new(message: T) -> Self {
    Self {
      state: AtomicU8::new(PENDING),
      message: Mutex::new(Some(message)),
      park: Mutex::new(()),
      delivered: Arc::new(Condvar::new()),
    }
  }

  fn is_sent(&self) -> bool {
    self.state.load(Ordering::Acquire) == SENT
  }

  fn notify_delivered(&self) {
    let _park = self.park.lock();
    self.delivered.notify_all();
  }
}

#[derive(Debug)]
struct NbReceiver<T> {
  state: AtomicU8,
  message: Mutex<Option<T>>,
}

impl<T: Element> NbReceiver<T> {
  fn new() -> Self {
    Self {
      state: AtomicU8::new(WAITING),
      message: Mutex::new(None),
    }
  }

  fn retire(&self) -> bool {
    self
      .state
      .compare_exchange(WAITING, RETIRED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }
}

impl<T: Element> LockFreeMessageQueue<T> {
  pub fn new() -> Self {
    Self {
      shared: Arc::new(NbShared {
        pending: LockFreeQueue::new(),
        receivers: LockFreeQueue::new(),
        park: Mutex::new(()),
        wake: Arc::new(Condvar::new()),
      }),
    }
  }

  pub fn send(&self, message: T) -> LockFreeSendTicket<T> {
    // Direct handoff to the oldest live parked receiver.
    let mut message = message;
    while let Some(receiver) = self.shared.receivers.get() {
      match self.try_deliver(&receiver, message) {
        Ok(()) => return LockFreeSendTicket::Delivered,
        Err(returned) => message = returned,
      }
    }

    let entry = Arc::new(NbPendingSend::new(message));
    self.shared.pending.put(entry.clone());

    // A receiver may have parked between the peek above and the enqueue;
    // marry parked receivers to the oldest pending sends until our entry is
    // taken or no receiver is left.
    self.pair_parked_receivers(&entry);

    LockFreeSendTicket::Pending(LockFreePendingTicket { entry })
  }

  /// Receives the oldest pending value, parking up to `timeout` when none is
  /// available. `Ok(None)` is a timeout; a delivery that landed before a
  /// cancellation was observed is still returned.
  pub fn receive(&self, timeout: Timeout, token: &CancelToken) -> Result<Option<T>, Cancelled> {
    if let Some(message) = self.take_pending() {
      return Ok(Some(message));
    }
    if timeout.is_no_wait() {
      return Ok(None);
    }

    let deadline = Deadline::start(timeout);
    let slot = Arc::new(NbReceiver::new());
    self.shared.receivers.put(slot.clone());

    let mut parked = self.shared.park.lock();
    let _watch = token.watch(&self.shared.wake);
    let backoff = Backoff::new();
    loop {
      match slot.state.load(Ordering::Acquire) {
        DELIVERED => return Ok(slot.message.lock().take()),
        CLAIMED => {
          // A sender is writing our slot; the value is imminent.
          MutexGuard::unlocked(&mut parked, || backoff.snooze());
        }
        _ => {
          if self.shared.pending.is_not_empty() {
            // Retire our slot first so a concurrent direct handoff cannot
            // hand us a second value while we take a pending one.
            if slot.retire() {
              if let Some(message) = self.take_pending() {
                return Ok(Some(message));
              }
              // Raced with another taker. A sender may have discarded the
              // retired slot already, so re-arm and enqueue it again.
              slot.state.store(WAITING, Ordering::Release);
              self.shared.receivers.put(slot.clone());
            }
            continue;
          }
          if token.is_cancelled() {
            if slot.retire() {
              return Err(Cancelled);
            }
            continue;
          }
          if deadline.is_expired() {
            if slot.retire() {
              return Ok(None);
            }
            continue;
          }
          park(&deadline, &self.shared.wake, &mut parked);
        }
      }
    }
  }

  fn try_deliver(&self, receiver: &Arc<NbReceiver<T>>, message: T) -> Result<(), T> {
    if receiver
      .state
      .compare_exchange(WAITING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      // Retired or already served through a duplicate registration.
      return Err(message);
    }
    *receiver.message.lock() = Some(message);
    receiver.state.store(DELIVERED, Ordering::Release);
    let _park = self.shared.park.lock();
    self.shared.wake.notify_all();
    Ok(())
  }

  fn pair_parked_receivers(&self, entry: &Arc<NbPendingSend<T>>) {
    while entry.state.load(Ordering::Acquire) == PENDING {
      let receiver = match self.shared.receivers.get() {
        Some(receiver) => receiver,
        None => break,
      };
      if receiver
        .state
        .compare_exchange(WAITING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
      {
        continue;
      }
      match self.take_pending() {
        Some(message) => {
          *receiver.message.lock() = Some(message);
          receiver.state.store(DELIVERED, Ordering::Release);
          let _park = self.shared.park.lock();
          self.shared.wake.notify_all();
        }
        None => {
          // Someone drained the pending queue first; release the receiver.
          receiver.state.store(WAITING, Ordering::Release);
          self.shared.receivers.put(receiver);
          break;
        }
      }
    }
  }

  /// Pops pending entries until one is successfully claimed. Cancelled
  /// entries surface here as tombstones and are discarded.
  fn take_pending(&self) -> Option<T> {
    while let Some(entry) = self.shared.pending.get() {
      if entry
        .state
        .compare_exchange(PENDING, SENT, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        let message = entry.message.lock().take();
        entry.notify_delivered();
        if message.is_some() {
          return message;
        }
      } else {
        tracing::trace!("discarding cancelled pending send");
      }
    }
    None
  }
}

impl<T: Element> Default for LockFreeMessageQueue<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Element> Clone for LockFreeMessageQueue<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

/// Handle returned by [`LockFreeMessageQueue::send`].
#[derive(Debug)]
pub enum LockFreeSendTicket<T: Element> {
  /// The value was handed directly to a parked receiver.
  Delivered,
  /// The value sits in the pending queue until a receiver claims it.
  Pending(LockFreePendingTicket<T>),
}

impl<T: Element> LockFreeSendTicket<T> {
  /// Non-blocking delivery poll; a plain atomic flag read.
  pub fn is_sent(&self) -> bool {
    match self {
      LockFreeSendTicket::Delivered => true,
      LockFreeSendTicket::Pending(ticket) => ticket.entry.is_sent(),
    }
  }

  /// Withdraws the value if no receiver has claimed it yet. The entry stays
  /// in the pending queue as a tombstone and is discarded when popped.
  pub fn try_cancel(&self) -> bool {
    match self {
      LockFreeSendTicket::Delivered => false,
      LockFreeSendTicket::Pending(ticket) => {
        match ticket
          .entry
          .state
          .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
          Ok(_) => true,
          Err(current) => current == CANCELLED,
        }
      }
    }
  }

  /// Blocks the sender until the value is delivered, the deadline passes
  /// (`Ok(false)`) or the token fires.
  pub fn await_delivery(&self, timeout: Timeout, token: &CancelToken) -> Result<bool, Cancelled> {
    match self {
      LockFreeSendTicket::Delivered => Ok(true),
      LockFreeSendTicket::Pending(ticket) => ticket.await_delivery(timeout, token),
    }
  }
}

#[derive(Debug)]
pub struct LockFreePendingTicket<T: Element> {
  entry: Arc<NbPendingSend<T>>,
}

impl<T: Element> LockFreePendingTicket<T> {
  fn await_delivery(&self, timeout: Timeout, token: &CancelToken) -> Result<bool, Cancelled> {
    if self.entry.is_sent() {
      return Ok(true);
    }
    if timeout.is_no_wait() || self.entry.state.load(Ordering::Acquire) == CANCELLED {
      return Ok(false);
    }
    let deadline = Deadline::start(timeout);
    let mut parked = self.entry.park.lock();
    let _watch = token.watch(&self.entry.delivered);
    loop {
      if self.entry.is_sent() {
        return Ok(true);
      }
      if token.is_cancelled() {
        return Err(Cancelled);
      }
      if deadline.is_expired() {
        return Ok(false);
      }
      park(&deadline, &self.entry.delivered, &mut parked);
    }
  }
}

impl<T: Element> Clone for LockFreeSendTicket<T> {
  fn clone(&self) -> Self {
    match self {
      LockFreeSendTicket::Delivered => LockFreeSendTicket::Delivered,
      LockFreeSendTicket::Pending(ticket) => LockFreeSendTicket::Pending(LockFreePendingTicket {
        entry: ticket.entry.clone(),
      }),
    }
  }
}

static_assertions::assert_impl_all!(LockFreeMessageQueue<String>: Send, Sync);
static_assertions::assert_impl_all!(LockFreeSendTicket<String>: Send, Sync);
