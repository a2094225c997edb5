use std::cmp::Ordering;
use std::fmt::Debug;

use thiserror::Error;

mod bounded_queue;
mod bounded_queue_test;
mod lock_free_queue;

pub use self::{bounded_queue::*, lock_free_queue::*};

use crate::collections::element::Element;

/// An error that occurs when a queue operation fails.
#[derive(Error, Debug, PartialEq)]
pub enum QueueError<E> {
  #[error("Failed to offer an element: {0:?}")]
  OfferError(E),
}

/// The size of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueSize {
  /// The queue has no capacity limit.
  Limitless,
  /// The queue has a capacity limit.
  Limited(usize),
}

impl QueueSize {
  /// Returns whether the queue has no capacity limit.
  pub fn is_limitless(&self) -> bool {
    matches!(self, QueueSize::Limitless)
  }

  /// Converts to an option type: `None` when limitless.
  pub fn to_option(&self) -> Option<usize> {
    match self {
      QueueSize::Limitless => None,
      QueueSize::Limited(c) => Some(*c),
    }
  }

  /// Converts to a usize, saturating at `usize::MAX` when limitless.
  pub fn to_usize(&self) -> usize {
    match self {
      QueueSize::Limitless => usize::MAX,
      QueueSize::Limited(c) => *c,
    }
  }
}

impl PartialOrd<Self> for QueueSize {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    match (self, other) {
      (QueueSize::Limitless, QueueSize::Limitless) => Some(Ordering::Equal),
      (QueueSize::Limitless, _) => Some(Ordering::Greater),
      (_, QueueSize::Limitless) => Some(Ordering::Less),
      (QueueSize::Limited(l), QueueSize::Limited(r)) => l.partial_cmp(r),
    }
  }
}

/// A trait that defines the behavior of a queue.
pub trait QueueBase<E: Element>: Debug + Send + Sync {
  /// Returns whether this queue is empty.
  fn is_empty(&self) -> bool {
    self.len() == QueueSize::Limited(0)
  }

  /// Returns whether this queue is non-empty.
  fn non_empty(&self) -> bool {
    !self.is_empty()
  }

  /// Returns the length of this queue.
  fn len(&self) -> QueueSize;

  /// Returns the capacity of this queue.
  fn capacity(&self) -> QueueSize;
}

pub trait QueueWriter<E: Element>: QueueBase<E> {
  /// Inserts the specified element into this queue, if that is possible
  /// without violating the capacity limit.
  fn offer(&mut self, element: E) -> Result<(), QueueError<E>>;
}

pub trait QueueReader<E: Element>: QueueBase<E> {
  /// Retrieves and deletes the head of the queue. Returns `None` if the
  /// queue is empty.
  fn poll(&mut self) -> Option<E>;
}
