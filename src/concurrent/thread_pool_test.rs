#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{mpsc, Arc};
  use std::thread;
  use std::time::Duration;

  use once_cell::sync::Lazy;
  use tracing_subscriber::EnvFilter;

  use crate::concurrent::cancel::CancelToken;
  use crate::concurrent::deadline::Timeout;
  use crate::concurrent::thread_pool::{ExecuteError, ThreadPool};

  static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env())
      .try_init();
  });

  /// Saturates the pool with jobs that each block until a token arrives on
  /// the returned gate.
  fn saturate(pool: &ThreadPool, workers: usize) -> mpsc::Sender<()> {
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let gate_rx = Arc::new(std::sync::Mutex::new(gate_rx));
    let token = CancelToken::new();
    for _ in 0..workers {
      let gate_rx = gate_rx.clone();
      let accepted = pool
        .execute(
          move || {
            let _ = gate_rx.lock().unwrap().recv();
          },
          Timeout::NoWait,
          &token,
        )
        .unwrap();
      assert!(accepted);
    }
    gate_tx
  }

  #[test]
  fn test_accepts_up_to_max_size_without_waiting() {
    Lazy::force(&TRACING);
    let pool = ThreadPool::new(3, Timeout::millis(200));
    let token = CancelToken::new();

    let gate = saturate(&pool, 3);
    // Pool is full and nobody is idle: a no-wait submission must fail.
    let accepted = pool.execute(|| {}, Timeout::NoWait, &token).unwrap();
    assert!(!accepted);

    for _ in 0..3 {
      gate.send(()).unwrap();
    }
    let done = pool.await_termination(Timeout::millis(2_000), &token).unwrap();
    assert!(done);
  }

  #[test]
  fn test_queued_submission_is_claimed_when_a_worker_frees_up() {
    Lazy::force(&TRACING);
    let pool = ThreadPool::new(1, Timeout::millis(200));
    let token = CancelToken::new();
    let ran = Arc::new(AtomicUsize::new(0));

    let gate = saturate(&pool, 1);
    let submitter = {
      let pool = pool.clone();
      let ran = ran.clone();
      thread::spawn(move || {
        let token = CancelToken::new();
        pool.execute(
          move || {
            ran.fetch_add(1, Ordering::SeqCst);
          },
          Timeout::Infinite,
          &token,
        )
      })
    };
    thread::sleep(Duration::from_millis(30));
    gate.send(()).unwrap();

    assert!(submitter.join().unwrap().unwrap());
    assert!(pool.await_termination(Timeout::millis(2_000), &token).unwrap());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_submission_times_out_when_pool_stays_busy() {
    let pool = ThreadPool::new(1, Timeout::millis(200));
    let token = CancelToken::new();

    let gate = saturate(&pool, 1);
    let accepted = pool.execute(|| {}, Timeout::millis(40), &token).unwrap();
    assert!(!accepted);

    gate.send(()).unwrap();
    assert!(pool.await_termination(Timeout::millis(2_000), &token).unwrap());
  }

  #[test]
  fn test_cancelled_submission_withdraws_from_queue() {
    let pool = ThreadPool::new(1, Timeout::millis(200));
    let token = CancelToken::new();

    let gate = saturate(&pool, 1);
    let (entered_tx, entered_rx) = mpsc::channel();
    let submitter = {
      let pool = pool.clone();
      let token = token.clone();
      thread::spawn(move || {
        entered_tx.send(()).unwrap();
        pool.execute(|| {}, Timeout::Infinite, &token)
      })
    };
    entered_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(30));
    token.cancel();
    match submitter.join().unwrap() {
      Err(ExecuteError::Cancelled(_)) => {}
      other => panic!("Expected cancelled submission, got {:?}", other.map(|_| ())),
    }

    gate.send(()).unwrap();
    let fresh = CancelToken::new();
    assert!(pool.await_termination(Timeout::millis(2_000), &fresh).unwrap());
  }

  #[test]
  fn test_shutdown_rejects_new_work_but_finishes_queued() {
    let pool = ThreadPool::new(1, Timeout::millis(200));
    let token = CancelToken::new();
    let ran = Arc::new(AtomicUsize::new(0));

    let gate = saturate(&pool, 1);
    let (entered_tx, entered_rx) = mpsc::channel();
    let submitter = {
      let pool = pool.clone();
      let ran = ran.clone();
      thread::spawn(move || {
        let token = CancelToken::new();
        entered_tx.send(()).unwrap();
        pool.execute(
          move || {
            ran.fetch_add(1, Ordering::SeqCst);
          },
          Timeout::Infinite,
          &token,
        )
      })
    };
    entered_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(30));
    pool.shutdown();

    match pool.execute(|| {}, Timeout::NoWait, &token) {
      Err(ExecuteError::Rejected) => {}
      other => panic!("Expected rejection, got {:?}", other.map(|_| ())),
    }

    gate.send(()).unwrap();
    assert!(submitter.join().unwrap().unwrap());
    assert!(pool.await_termination(Timeout::millis(2_000), &token).unwrap());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_retired_worker_leaves_room_for_a_new_one() {
    let pool = ThreadPool::new(1, Timeout::millis(20));
    let token = CancelToken::new();
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
      let ran = ran.clone();
      let accepted = pool
        .execute(
          move || {
            ran.fetch_add(1, Ordering::SeqCst);
          },
          Timeout::NoWait,
          &token,
        )
        .unwrap();
      assert!(accepted);
      assert!(pool.await_termination(Timeout::millis(2_000), &token).unwrap());
      // Let the lone worker retire before the next round.
      thread::sleep(Duration::from_millis(60));
    }
    assert_eq!(ran.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn test_await_termination_with_nothing_pending_is_immediate() {
    let pool = ThreadPool::new(2, Timeout::millis(100));
    let token = CancelToken::new();
    assert!(pool.await_termination(Timeout::NoWait, &token).unwrap());
    // A cancelled token with nothing pending still reports success.
    token.cancel();
    assert!(pool.await_termination(Timeout::millis(100), &token).unwrap());
  }

  #[test]
  fn test_panicking_job_does_not_wedge_accounting() {
    Lazy::force(&TRACING);
    let pool = ThreadPool::new(1, Timeout::millis(200));
    let token = CancelToken::new();

    assert!(pool.execute(|| panic!("boom"), Timeout::NoWait, &token).unwrap());
    assert!(pool.await_termination(Timeout::millis(2_000), &token).unwrap());

    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_job = ran.clone();
    assert!(pool
      .execute(
        move || {
          ran_in_job.fetch_add(1, Ordering::SeqCst);
        },
        Timeout::millis(500),
        &token
      )
      .unwrap());
    assert!(pool.await_termination(Timeout::millis(2_000), &token).unwrap());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }
}
