//! Background tasks: the queue seam and the frequency scheduler.

mod queue;
mod scheduler;

pub use {
    queue::{LocalQueue, TaskQueue},
    scheduler::{NAMESPACE, SchedulerComponent},
};
