//! Preemptive multi-class scheduler: TCB/queue primitives (component A) and
//! the scheduler core (component B).

pub mod queue;
pub mod scheduler;
pub mod tcb;

pub use queue::{ClassId, SchedClass, CLASS_APPLICATION, CLASS_BACKGROUND, CLASS_IDLE, CLASS_REALTIME};
pub use scheduler::{scheduler_enqueue_delay, scheduler_start, stats, ticks, SchedulerStats};
pub use tcb::{thread_create, Tcb, ThreadInfo};
