use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::collections::Element;
use crate::concurrent::cancel::{CancelToken, Cancelled};
use crate::concurrent::deadline::{park, Deadline, Timeout};

/// One-item-at-a-time handoff channel.
///
/// `send` never blocks: it either hands the value straight to the oldest
/// parked receiver or appends it to the pending FIFO and returns a ticket the
/// sender can poll, wait on or cancel. `receive` takes the oldest pending
/// send or parks under a deadline.
#[derive(Debug)]
pub struct MessageQueue<T: Element> {
  shared: Arc<MqShared<T>>,
}

impl<T: Element> Clone for MessageQueue<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

#[derive(Debug)]
struct MqShared<T> {
  state: Mutex<MqState<T>>,
}

#[derive(Debug)]
struct MqState<T> {
  pending: VecDeque<Arc<PendingSend<T>>>,
  receivers: VecDeque<Arc<ReceiverSlot<T>>>,
}

#[derive(Debug)]
struct ReceiverSlot<T> {
  wake: Arc<Condvar>,
  message: Mutex<Option<T>>,
}

/// Pending-send record. Carries its own finer-grained lock so polling or
/// cancelling one ticket never contends with unrelated sends and receives.
#[derive(Debug)]
struct PendingSend<T> {
  delivered: Arc<Condvar>,
  cell: Mutex<TicketCell<T>>,
}

#[derive(Debug)]
struct TicketCell<T> {
  message: Option<T>,
  sent: bool,
  cancelled: bool,
}

impl<T: Element> PendingSend<T> {
  /// Takes the message out and marks the ticket delivered. Called by the
  /// receive path while it holds the queue lock.
  fn mark_sent(&self) -> Option<T> {
    let mut cell = self.cell.lock();
    let message = cell.message.take();
    cell.sent = true;
    drop(cell);
    self.delivered.notify_all();
    message
  }
}

impl<T: Element> MessageQueue<T> {
  pub fn new() -> Self {
    Self {
      shared: Arc::new(MqShared {
        state: Mutex::new(MqState {
          pending: VecDeque::new(),
          receivers: VecDeque::new(),
        }),
      }),
    }
  }

  pub fn send(&self, message: T) -> SendTicket<T> {
    let mut state = self.shared.state.lock();
    if let Some(receiver) = state.receivers.pop_front() {
      *receiver.message.lock() = Some(message);
      receiver.wake.notify_one();
      return SendTicket::Delivered;
    }
    let entry = Arc::new(PendingSend {
      delivered: Arc::new(Condvar::new()),
      cell: Mutex::new(TicketCell {
        message: Some(message),
        sent: false,
        cancelled: false,
      }),
    });
    state.pending.push_back(entry.clone());
    SendTicket::Pending(PendingTicket {
      shared: self.shared.clone(),
      entry,
    })
  }

  /// Receives the oldest pending value, parking up to `timeout` when none is
  /// available. `Ok(None)` is a timeout. A delivery that landed before a
  /// cancellation was observed is still returned.
  pub fn receive(&self, timeout: Timeout, token: &CancelToken) -> Result<Option<T>, Cancelled> {
    let mut state = self.shared.state.lock();

    // Fast path: a sender is already queued.
    while let Some(entry) = state.pending.pop_front() {
      if let Some(message) = entry.mark_sent() {
        return Ok(Some(message));
      }
    }

    if timeout.is_no_wait() {
      return Ok(None);
    }

    let deadline = Deadline::start(timeout);
    let slot = Arc::new(ReceiverSlot {
      wake: Arc::new(Condvar::new()),
      message: Mutex::new(None),
    });
    state.receivers.push_back(slot.clone());

    let _watch = token.watch(&slot.wake);
    loop {
      if let Some(message) = slot.message.lock().take() {
        return Ok(Some(message));
      }
      if token.is_cancelled() {
        state.receivers.retain(|r| !Arc::ptr_eq(r, &slot));
        return Err(Cancelled);
      }
      if deadline.is_expired() {
        state.receivers.retain(|r| !Arc::ptr_eq(r, &slot));
        return Ok(None);
      }
      park(&deadline, &slot.wake, &mut state);
    }
  }
}

impl<T: Element> Default for MessageQueue<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Handle returned by [`MessageQueue::send`].
#[derive(Debug)]
pub enum SendTicket<T: Element> {
  /// The value was handed directly to a parked receiver.
  Delivered,
  /// The value sits in the pending FIFO until a receiver takes it.
  Pending(PendingTicket<T>),
}

impl<T: Element> SendTicket<T> {
  /// Non-blocking delivery poll.
  pub fn is_sent(&self) -> bool {
    match self {
      SendTicket::Delivered => true,
      SendTicket::Pending(ticket) => ticket.entry.cell.lock().sent,
    }
  }

  /// Withdraws the value if it has not been delivered yet. Returns `false`
  /// once a receiver already took it.
  pub fn try_cancel(&self) -> bool {
    match self {
      SendTicket::Delivered => false,
      SendTicket::Pending(ticket) => ticket.try_cancel(),
    }
  }

  /// Blocks the sender until the value is delivered, the deadline passes
  /// (`Ok(false)`) or the token fires. Neither outcome withdraws the value;
  /// a pending send stays deliverable.
  pub fn await_delivery(&self, timeout: Timeout, token: &CancelToken) -> Result<bool, Cancelled> {
    match self {
      SendTicket::Delivered => Ok(true),
      SendTicket::Pending(ticket) => ticket.await_delivery(timeout, token),
    }
  }
}

#[derive(Debug)]
pub struct PendingTicket<T: Element> {
  shared: Arc<MqShared<T>>,
  entry: Arc<PendingSend<T>>,
}

impl<T: Element> Clone for SendTicket<T> {
  fn clone(&self) -> Self {
    match self {
      SendTicket::Delivered => SendTicket::Delivered,
      SendTicket::Pending(ticket) => SendTicket::Pending(ticket.clone()),
    }
  }
}

impl<T: Element> Clone for PendingTicket<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
      entry: self.entry.clone(),
    }
  }
}

impl<T: Element> PendingTicket<T> {
  fn try_cancel(&self) -> bool {
    // Queue lock before ticket lock, as everywhere else.
    let mut state = self.shared.state.lock();
    let mut cell = self.entry.cell.lock();
    if cell.sent {
      return false;
    }
    if !cell.cancelled {
      cell.cancelled = true;
      state.pending.retain(|e| !Arc::ptr_eq(e, &self.entry));
    }
    true
  }

  fn await_delivery(&self, timeout: Timeout, token: &CancelToken) -> Result<bool, Cancelled> {
    let mut cell = self.entry.cell.lock();
    if cell.sent {
      return Ok(true);
    }
    if timeout.is_no_wait() || cell.cancelled {
      return Ok(false);
    }
    let deadline = Deadline::start(timeout);
    let _watch = token.watch(&self.entry.delivered);
    loop {
      if cell.sent {
        return Ok(true);
      }
      if token.is_cancelled() {
        return Err(Cancelled);
      }
      if deadline.is_expired() {
        return Ok(false);
      }
      park(&deadline, &self.entry.delivered, &mut cell);
    }
  }
}

static_assertions::assert_impl_all!(MessageQueue<String>: Send, Sync);
static_assertions::assert_impl_all!(SendTicket<String>: Send, Sync);
