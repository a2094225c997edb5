#[cfg(test)]
mod tests {
  use crate::collections::queue::bounded_queue::BoundedQueue;
  use crate::collections::{QueueBase, QueueError, QueueReader, QueueSize, QueueWriter};

  #[test]
  fn test_offer_and_poll_in_order() {
    let mut queue = BoundedQueue::new(3);
    for i in 0..3 {
      assert!(queue.offer(i).is_ok());
    }
    assert_eq!(queue.len(), QueueSize::Limited(3));
    for i in 0..3 {
      assert_eq!(queue.poll(), Some(i));
    }
    assert_eq!(queue.poll(), None);
  }

  #[test]
  fn test_offer_to_full_queue_returns_element() {
    let mut queue = BoundedQueue::new(2);
    assert!(queue.offer(1).is_ok());
    assert!(queue.offer(2).is_ok());
    match queue.offer(3) {
      Err(QueueError::OfferError(rejected)) => assert_eq!(rejected, 3),
      other => panic!("Expected OfferError, got {:?}", other),
    }
    assert_eq!(queue.len(), QueueSize::Limited(2));
  }

  #[test]
  fn test_capacity_is_reported() {
    let queue = BoundedQueue::<u32>::new(8);
    assert_eq!(queue.capacity(), QueueSize::Limited(8));
    assert!(queue.is_empty());
  }
}
