use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use crossbeam_utils::Backoff;

use crate::collections::element::Element;
use crate::collections::queue::{QueueBase, QueueError, QueueReader, QueueSize, QueueWriter};

/// An unbounded multi-producer/multi-consumer FIFO built from compare-and-swap
/// alone (Michael–Scott). No operation ever blocks or takes a lock.
///
/// The queue always holds one dummy node: `head` points at the most recently
/// consumed node and the first live element is `head.next`. Retired dummies
/// are reclaimed through epoch-based deferral, so a concurrent reader can
/// never touch freed memory.
#[derive(Debug)]
pub struct LockFreeQueue<E> {
  inner: Arc<Inner<E>>,
}

impl<E> Clone for LockFreeQueue<E> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

#[derive(Debug)]
struct Inner<E> {
  head: Atomic<Node<E>>,
  tail: Atomic<Node<E>>,
  len: AtomicUsize,
}

#[derive(Debug)]
struct Node<E> {
  item: MaybeUninit<E>,
  next: Atomic<Node<E>>,
}

impl<E: Element> LockFreeQueue<E> {
  pub fn new() -> Self {
    let inner = Inner {
      head: Atomic::null(),
      tail: Atomic::null(),
      len: AtomicUsize::new(0),
    };
    let sentinel = Owned::new(Node {
      item: MaybeUninit::uninit(),
      next: Atomic::null(),
    });
    unsafe {
      let guard = epoch::unprotected();
      let sentinel = sentinel.into_shared(guard);
      inner.head.store(sentinel, Ordering::Relaxed);
      inner.tail.store(sentinel, Ordering::Relaxed);
    }
    Self { inner: Arc::new(inner) }
  }

  /// Appends `item` to the tail. Retries on contention; any thread that
  /// observes a lagging tail helps advance it first.
  pub fn put(&self, item: E) {
    let guard = epoch::pin();
    let mut new = Owned::new(Node {
      item: MaybeUninit::new(item),
      next: Atomic::null(),
    });
    let backoff = Backoff::new();
    loop {
      let tail = self.inner.tail.load(Ordering::Acquire, &guard);
      let tail_ref = unsafe { tail.deref() };
      let next = tail_ref.next.load(Ordering::Acquire, &guard);

      if !next.is_null() {
        // Tail is lagging behind the real last node.
        let _ = self
          .inner
          .tail
          .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, &guard);
        continue;
      }

      match tail_ref
        .next
        .compare_exchange(Shared::null(), new, Ordering::Release, Ordering::Relaxed, &guard)
      {
        Ok(appended) => {
          // Best effort: a failure means another operation advanced it.
          let _ = self
            .inner
            .tail
            .compare_exchange(tail, appended, Ordering::Release, Ordering::Relaxed, &guard);
          self.inner.len.fetch_add(1, Ordering::Relaxed);
          return;
        }
        Err(err) => {
          new = err.new;
          backoff.spin();
        }
      }
    }
  }

  /// Pops the oldest element, or returns `None` if the queue is empty.
  ///
  /// The consumed node becomes the new dummy; its payload slot is read out
  /// exactly once by the thread that won the head CAS.
  pub fn get(&self) -> Option<E> {
    let guard = epoch::pin();
    let backoff = Backoff::new();
    loop {
      let head = self.inner.head.load(Ordering::Acquire, &guard);
      let head_ref = unsafe { head.deref() };
      let next = head_ref.next.load(Ordering::Acquire, &guard);
      let next_ref = match unsafe { next.as_ref() } {
        Some(next_ref) => next_ref,
        None => return None,
      };

      match self
        .inner
        .head
        .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, &guard)
      {
        Ok(_) => {
          // Keep the tail from pointing at the node we are retiring.
          let tail = self.inner.tail.load(Ordering::Relaxed, &guard);
          if head == tail {
            let _ = self
              .inner
              .tail
              .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, &guard);
          }
          let item = unsafe { next_ref.item.as_ptr().read() };
          unsafe { guard.defer_destroy(head) };
          self.inner.len.fetch_sub(1, Ordering::Relaxed);
          return Some(item);
        }
        Err(_) => backoff.spin(),
      }
    }
  }

  /// Snapshot read of `head.next`; advisory only, it may be stale by the
  /// time the caller acts on it.
  pub fn is_empty(&self) -> bool {
    let guard = epoch::pin();
    let head = self.inner.head.load(Ordering::Acquire, &guard);
    let head_ref = unsafe { head.deref() };
    head_ref.next.load(Ordering::Acquire, &guard).is_null()
  }

  pub fn is_not_empty(&self) -> bool {
    !self.is_empty()
  }
}

impl<E: Element> Default for LockFreeQueue<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E> Drop for Inner<E> {
  fn drop(&mut self) {
    unsafe {
      let guard = epoch::unprotected();
      let mut node = self.head.load(Ordering::Relaxed, guard);
      // The first node is the dummy; only later nodes still own a payload.
      let mut is_sentinel = true;
      while !node.is_null() {
        let next = node.deref().next.load(Ordering::Relaxed, guard);
        if !is_sentinel {
          drop(node.deref().item.as_ptr().read());
        }
        drop(node.into_owned());
        node = next;
        is_sentinel = false;
      }
    }
  }
}

impl<E: Element> QueueBase<E> for LockFreeQueue<E> {
  fn len(&self) -> QueueSize {
    QueueSize::Limited(self.inner.len.load(Ordering::Relaxed))
  }

  fn capacity(&self) -> QueueSize {
    QueueSize::Limitless
  }

  fn is_empty(&self) -> bool {
    self.is_empty()
  }
}

impl<E: Element> QueueWriter<E> for LockFreeQueue<E> {
  fn offer(&mut self, element: E) -> Result<(), QueueError<E>> {
    self.put(element);
    Ok(())
  }
}

impl<E: Element> QueueReader<E> for LockFreeQueue<E> {
  fn poll(&mut self) -> Option<E> {
    self.get()
  }
}

static_assertions::assert_impl_all!(LockFreeQueue<usize>: Send, Sync);
