use std::collections::VecDeque;

use crate::collections::element::Element;
use crate::collections::queue::{QueueBase, QueueError, QueueReader, QueueSize, QueueWriter};

/// A fixed-capacity FIFO that rejects elements once full.
///
/// Not internally synchronized; callers guard it with their own lock. The
/// event bus uses one of these per subscriber as its pending mailbox.
#[derive(Debug)]
pub struct BoundedQueue<E> {
  buffer: VecDeque<E>,
  capacity: usize,
}

impl<E: Element> BoundedQueue<E> {
  pub fn new(capacity: usize) -> Self {
    assert!(capacity > 0, "Capacity must be greater than zero");
    Self {
      buffer: VecDeque::with_capacity(capacity),
      capacity,
    }
  }
}

impl<E: Element> QueueBase<E> for BoundedQueue<E> {
  fn len(&self) -> QueueSize {
    QueueSize::Limited(self.buffer.len())
  }

  fn capacity(&self) -> QueueSize {
    QueueSize::Limited(self.capacity)
  }
}

impl<E: Element> QueueWriter<E> for BoundedQueue<E> {
  fn offer(&mut self, element: E) -> Result<(), QueueError<E>> {
    if self.buffer.len() == self.capacity {
      return Err(QueueError::OfferError(element));
    }
    self.buffer.push_back(element);
    Ok(())
  }
}

impl<E: Element> QueueReader<E> for BoundedQueue<E> {
  fn poll(&mut self) -> Option<E> {
    self.buffer.pop_front()
  }
}
