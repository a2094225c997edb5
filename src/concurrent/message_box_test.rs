#[cfg(test)]
mod tests {
  use std::sync::{Arc, Barrier};
  use std::thread;

  use crate::concurrent::message_box::MessageBox;

  #[test]
  fn test_empty_box_yields_nothing() {
    let message_box = MessageBox::<u32>::new();
    assert_eq!(message_box.try_consume(), None);
  }

  #[test]
  fn test_lives_bound_consumption() {
    let message_box = MessageBox::new();
    message_box.publish("note", 2);
    assert_eq!(message_box.try_consume(), Some("note"));
    assert_eq!(message_box.try_consume(), Some("note"));
    assert_eq!(message_box.try_consume(), None);
  }

  #[test]
  fn test_republish_resets_lives() {
    let message_box = MessageBox::new();
    message_box.publish(1u32, 1);
    assert_eq!(message_box.try_consume(), Some(1));
    assert_eq!(message_box.try_consume(), None);
    message_box.publish(2u32, 3);
    assert_eq!(message_box.try_consume(), Some(2));
    assert_eq!(message_box.try_consume(), Some(2));
    assert_eq!(message_box.try_consume(), Some(2));
    assert_eq!(message_box.try_consume(), None);
  }

  #[test]
  fn test_concurrent_consumers_get_exactly_lives_values() {
    const LIVES: usize = 8;
    const THREADS: usize = 2 * LIVES;

    let message_box = Arc::new(MessageBox::new());
    message_box.publish("shared", LIVES);
    let barrier = Arc::new(Barrier::new(THREADS));

    let mut handles = Vec::new();
    for _ in 0..THREADS {
      let message_box = message_box.clone();
      let barrier = barrier.clone();
      handles.push(thread::spawn(move || {
        barrier.wait();
        message_box.try_consume()
      }));
    }

    let successes = handles
      .into_iter()
      .map(|handle| handle.join().unwrap())
      .filter(Option::is_some)
      .count();
    assert_eq!(successes, LIVES);
    assert_eq!(message_box.try_consume(), None);
  }
}
