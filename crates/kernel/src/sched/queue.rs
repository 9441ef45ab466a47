//! Scheduling-class descriptors and the per-class run queues.
//!
//! Each class is an immutable record of three operations over a
//! [`List<Tcb>`]: `pick` (who runs next, without removing them for classes
//! that keep running the same head), `enqueue`, `dequeue`. The scheduler
//! core walks the four class constants in priority order; this module only
//! owns the policy each class applies to its own queue.

use super::tcb::Tcb;
use crate::lib::list::List;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassId {
    RealTime,
    Application,
    Background,
    Idle,
}

/// An immutable scheduling-class descriptor. `next` links to the
/// next-lower-priority class, forming the static chain the tick handler
/// and scheduler walk; `Idle` is the chain's end and has no `next`.
pub struct SchedClass {
    pub id: ClassId,
    pub next: Option<&'static SchedClass>,
}

pub static CLASS_IDLE: SchedClass = SchedClass { id: ClassId::Idle, next: None };
pub static CLASS_BACKGROUND: SchedClass = SchedClass { id: ClassId::Background, next: Some(&CLASS_IDLE) };
pub static CLASS_APPLICATION: SchedClass = SchedClass { id: ClassId::Application, next: Some(&CLASS_BACKGROUND) };
pub static CLASS_REALTIME: SchedClass = SchedClass { id: ClassId::RealTime, next: Some(&CLASS_APPLICATION) };

fn accessor(t: &Tcb) -> &crate::lib::list::Link<Tcb> {
    &t.queue_link
}

/// The three ordered run queues plus the idle slot and the bookkeeping
/// queues (sleep, blocked) that sit alongside them. A single instance of
/// this lives inside the scheduler singleton.
pub struct RunQueues {
    pub real_time: List<Tcb>,
    pub application: List<Tcb>,
    pub background: List<Tcb>,
    pub idle: Option<&'static Tcb>,
    pub sleep: List<Tcb>,
    pub blocked: List<Tcb>,
    pub all_threads: List<Tcb>,
}

fn all_accessor(t: &Tcb) -> &crate::lib::list::Link<Tcb> {
    &t.all_link
}

impl RunQueues {
    pub const fn new() -> Self {
        Self {
            real_time: List::new(accessor),
            application: List::new(accessor),
            background: List::new(accessor),
            idle: None,
            sleep: List::new(accessor),
            blocked: List::new(accessor),
            all_threads: List::new(all_accessor),
        }
    }

    fn queue_for(&mut self, class: ClassId) -> &mut List<Tcb> {
        match class {
            ClassId::RealTime => &mut self.real_time,
            ClassId::Application => &mut self.application,
            ClassId::Background => &mut self.background,
            ClassId::Idle => unreachable!("idle has a dedicated slot, not a queue"),
        }
    }

    /// Link `t` onto the all-threads list and its class's run queue (or
    /// install it as the idle slot, for the one idle thread).
    pub fn enqueue(&mut self, t: &'static Tcb) {
        if !t.all_link.is_linked() {
            self.all_threads.push_back(t);
        }
        match t.class().id {
            ClassId::Idle => self.idle = Some(t),
            class => self.queue_for(class).push_back(t),
        }
    }

    pub fn dequeue(&mut self, t: &'static Tcb) {
        match t.class().id {
            ClassId::Idle => {}
            class => self.queue_for(class).unlink(t),
        }
    }

    /// Walk the class chain from real-time down to idle; the first class
    /// with a runnable thread wins. Idle always resolves because its slot
    /// is populated once at boot and never emptied.
    pub fn pick(&self) -> &'static Tcb {
        if let Some(t) = self.real_time.front() {
            return t;
        }
        if let Some(t) = self.application.front() {
            return t;
        }
        if let Some(t) = self.background.front() {
            return t;
        }
        self.idle.expect("idle thread not installed before scheduling")
    }

    /// Round-robin rotation for application/background: move the current
    /// head to the tail of its own queue. Real-time and idle never rotate.
    pub fn rotate(&mut self, class: ClassId) {
        let queue = match class {
            ClassId::Application => &mut self.application,
            ClassId::Background => &mut self.background,
            ClassId::RealTime | ClassId::Idle => return,
        };
        if let Some(head) = queue.pop_front() {
            queue.push_back(head);
        }
    }

    pub fn len(&self, class: ClassId) -> usize {
        match class {
            ClassId::RealTime => self.real_time.len(),
            ClassId::Application => self.application.len(),
            ClassId::Background => self.background.len(),
            ClassId::Idle => usize::from(self.idle.is_some()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_always_wins_when_nothing_else_is_runnable() {
        let q = RunQueues::new();
        // idle slot unset; pick() would panic, matching the invariant that
        // scheduler_start must install the idle thread first. We only
        // assert the chain shape here.
        assert_eq!(CLASS_REALTIME.next.unwrap().id, ClassId::Application);
        assert_eq!(CLASS_APPLICATION.next.unwrap().id, ClassId::Background);
        assert_eq!(CLASS_BACKGROUND.next.unwrap().id, ClassId::Idle);
        assert!(CLASS_IDLE.next.is_none());
        let _ = q;
    }
}
