//! Low-level coordination primitives for preemptive OS threads.
//!
//! Every blocking operation takes a [`concurrent::Timeout`] turned into an
//! absolute deadline for the whole wait, and a [`concurrent::CancelToken`]
//! observed at each wake. Timeouts are ordinary results; cancellation is an
//! error unless the outcome was already decided before the signal was seen.

pub mod collections;
pub mod concurrent;
