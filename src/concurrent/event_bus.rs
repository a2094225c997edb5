use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::collections::{BoundedQueue, QueueError, QueueReader, QueueWriter};
use crate::concurrent::cancel::{CancelToken, Cancelled};

/// An error that occurs when publishing fails.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
  #[error("event bus is already shut down")]
  ShutDown,
}

/// Values that can travel through the [`EventBus`].
pub trait Event: Debug + Send + Sync + 'static {
  fn as_any(&self) -> &dyn Any;
}

impl<T: Debug + Send + Sync + 'static> Event for T {
  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Type-erased event as stored in subscriber mailboxes.
#[derive(Debug, Clone)]
pub struct EventHandle(Arc<dyn Event>);

impl EventHandle {
  pub fn new(event: impl Event) -> Self {
    Self(Arc::new(event))
  }

  pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
    self.0.as_any().downcast_ref()
  }
}

/// Type-keyed publish/subscribe hub with per-subscriber back-pressure.
///
/// Subscribers are bucketed by the `TypeId` of the message type they asked
/// for. Each subscriber owns a bounded mailbox; a publish appends to every
/// same-type mailbox that still has room and silently drops the message for
/// the ones that are full. The subscribing thread itself runs the processing
/// loop and only returns once the bus is shut down and its mailbox drained.
#[derive(Debug)]
pub struct EventBus {
  shared: Arc<BusShared>,
}

#[derive(Debug)]
struct BusShared {
  state: Mutex<BusState>,
  finished: Condvar,
  max_pending: usize,
}

#[derive(Debug)]
struct BusState {
  shutting_down: bool,
  buckets: HashMap<TypeId, TypeBucket>,
}

#[derive(Debug)]
struct TypeBucket {
  wake: Arc<Condvar>,
  subscribers: Vec<Arc<SubscriberCell>>,
}

#[derive(Debug)]
struct SubscriberCell {
  mailbox: Mutex<BoundedQueue<EventHandle>>,
}

impl EventBus {
  /// `max_pending` is the mailbox capacity of every subscriber.
  pub fn new(max_pending: usize) -> Self {
    assert!(max_pending > 0, "max_pending must be greater than zero");
    Self {
      shared: Arc::new(BusShared {
        state: Mutex::new(BusState {
          shutting_down: false,
          buckets: HashMap::new(),
        }),
        finished: Condvar::new(),
        max_pending,
      }),
    }
  }

  /// Registers the calling thread as a subscriber for messages of type `E`
  /// and runs its processing loop: events are handed to `handler` one at a
  /// time, in arrival order, outside the bus lock.
  ///
  /// Returns once the bus is shut down and the mailbox is fully drained, or
  /// immediately when the bus is already shut down. On cancellation the
  /// subscriber is deregistered before the error is reported.
  pub fn subscribe<E, F>(&self, mut handler: F, token: &CancelToken) -> Result<(), Cancelled>
  where
    E: Event,
    F: FnMut(&E), {
    let key = TypeId::of::<E>();
    let (cell, wake) = {
      let mut state = self.shared.state.lock();
      if state.shutting_down {
        return Ok(());
      }
      let bucket = state.buckets.entry(key).or_insert_with(|| TypeBucket {
        wake: Arc::new(Condvar::new()),
        subscribers: Vec::new(),
      });
      let cell = Arc::new(SubscriberCell {
        mailbox: Mutex::new(BoundedQueue::new(self.shared.max_pending)),
      });
      bucket.subscribers.push(cell.clone());
      (cell, bucket.wake.clone())
    };

    let result = self.process_loop::<E, F>(&cell, &wake, &mut handler, token);
    self.deregister(key, &cell);
    result
  }

  fn process_loop<E, F>(
    &self,
    cell: &Arc<SubscriberCell>,
    wake: &Arc<Condvar>,
    handler: &mut F,
    token: &CancelToken,
  ) -> Result<(), Cancelled>
  where
    E: Event,
    F: FnMut(&E), {
    let _watch = token.watch(wake);
    loop {
      let event = {
        let mut state = self.shared.state.lock();
        loop {
          if let Some(event) = cell.mailbox.lock().poll() {
            break Some(event);
          }
          if state.shutting_down {
            break None;
          }
          if token.is_cancelled() {
            return Err(Cancelled);
          }
          wake.wait(&mut state);
        }
      };
      match event {
        Some(event) => {
          if let Some(typed) = event.downcast_ref::<E>() {
            handler(typed);
          }
        }
        None => return Ok(()),
      }
    }
  }

  /// Removes the subscriber from its bucket; the last removal of the last
  /// bucket releases `shutdown`.
  fn deregister(&self, key: TypeId, cell: &Arc<SubscriberCell>) {
    let mut state = self.shared.state.lock();
    if let Some(bucket) = state.buckets.get_mut(&key) {
      bucket.subscribers.retain(|s| !Arc::ptr_eq(s, cell));
      if bucket.subscribers.is_empty() {
        state.buckets.remove(&key);
        if state.buckets.is_empty() {
          self.shared.finished.notify_all();
        }
      }
    }
  }

  /// Delivers `event` to every subscriber registered for its type.
  ///
  /// A subscriber whose mailbox is full does not receive the event; the drop
  /// is the documented back-pressure policy and is never surfaced to the
  /// publisher.
  pub fn publish<E: Event>(&self, event: E) -> Result<(), PublishError> {
    let state = self.shared.state.lock();
    if state.shutting_down {
      return Err(PublishError::ShutDown);
    }
    let bucket = match state.buckets.get(&TypeId::of::<E>()) {
      Some(bucket) => bucket,
      None => return Ok(()),
    };
    let handle = EventHandle::new(event);
    for cell in &bucket.subscribers {
      if let Err(QueueError::OfferError(dropped)) = cell.mailbox.lock().offer(handle.clone()) {
        tracing::debug!(?dropped, "subscriber mailbox full, dropping event");
      }
    }
    bucket.wake.notify_all();
    Ok(())
  }

  /// Flags the bus as shutting down, wakes every parked subscriber so it can
  /// drain its mailbox, and blocks until all subscribers have exited.
  pub fn shutdown(&self) {
    let mut state = self.shared.state.lock();
    state.shutting_down = true;
    for bucket in state.buckets.values() {
      bucket.wake.notify_all();
    }
    while !state.buckets.is_empty() {
      self.shared.finished.wait(&mut state);
    }
    tracing::debug!("event bus shut down, all subscribers drained");
  }
}

impl Clone for EventBus {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

static_assertions::assert_impl_all!(EventBus: Send, Sync);
static_assertions::assert_impl_all!(EventHandle: Send, Sync);
