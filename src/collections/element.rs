use std::fmt::Debug;

/// Marker for values that can travel through the queues in this crate.
pub trait Element: Debug + Send + Sync + 'static {}

impl<T: Debug + Send + Sync + 'static> Element for T {}
