mod cancel;
mod deadline;
mod event_bus;
mod keyed_exchanger;
mod lock_free_message_queue;
mod message_box;
mod message_box_test;
mod message_queue;
mod thread_pool;
mod thread_pool_test;

pub use self::{
  cancel::*, deadline::*, event_bus::*, keyed_exchanger::*, lock_free_message_queue::*, message_box::*,
  message_queue::*, thread_pool::*,
};
