//! Maintenance timers fired from the periodic tick.

use std::time::{Duration, Instant};

use crate::common::approximately;

const TASK_COUNT: usize = 10;

/// Base period of each hostname's announce cycle.
pub const ANNOUNCE_HOST_PERIOD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Periodic maintenance tasks, each with its own jittered timer.
pub enum Task {
    /// Ping the bootstrap targets while the routing table is empty.
    Bootstrap,
    /// Rotate the announce token secret.
    RotateToken,
    /// Expire transactions, nodes, values, tokens and cached responses.
    Expire,
    /// Split the routing table buckets.
    Split,
    /// find_node for our own [crate::Id].
    FindSelf,
    /// find_node for a random target.
    FindRandom,
    /// Check which hostnames are due to be announced again.
    AnnounceHost,
    /// Ping routing table nodes that are due.
    Ping,
    /// Refresh cached responses with internal lookups.
    RenewCache,
    /// Join the multicast group until it succeeds.
    Multicast,
}

impl Task {
    pub const ALL: [Task; TASK_COUNT] = [
        Task::Bootstrap,
        Task::RotateToken,
        Task::Expire,
        Task::Split,
        Task::FindSelf,
        Task::FindRandom,
        Task::AnnounceHost,
        Task::Ping,
        Task::RenewCache,
        Task::Multicast,
    ];

    /// Base interval before jitter.
    pub fn interval(&self) -> Duration {
        match self {
            Task::Bootstrap | Task::Expire => Duration::from_secs(60),
            Task::RotateToken | Task::Multicast => Duration::from_secs(5 * 60),
            Task::Split
            | Task::FindSelf
            | Task::FindRandom
            | Task::AnnounceHost
            | Task::Ping
            | Task::RenewCache => Duration::from_secs(5),
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Clone)]
/// Next deadline of every [Task].
pub struct Scheduler {
    deadlines: [Instant; TASK_COUNT],
}

impl Scheduler {
    /// Every task is due on the first tick.
    pub fn new(now: Instant) -> Self {
        Scheduler {
            deadlines: [now; TASK_COUNT],
        }
    }

    /// Returns `true` if `task` is due, and schedules its next run about one
    /// [Task::interval] from `now`.
    pub fn due(&mut self, task: Task, now: Instant) -> bool {
        let deadline = &mut self.deadlines[task.index()];

        if now < *deadline {
            return false;
        }

        *deadline = now + approximately(task.interval());
        true
    }

    #[cfg(test)]
    pub fn deadline(&self, task: Task) -> Instant {
        self.deadlines[task.index()]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn everything_due_at_start() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new(now);

        for task in Task::ALL {
            assert!(scheduler.due(task, now), "{:?}", task);
        }
    }

    #[test]
    fn reschedules_with_jitter() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new(now);

        assert!(scheduler.due(Task::Expire, now));
        assert!(!scheduler.due(Task::Expire, now + Duration::from_secs(50)));

        let deadline = scheduler.deadline(Task::Expire);
        assert!(deadline >= now + Duration::from_secs(54));
        assert!(deadline <= now + Duration::from_secs(66));

        assert!(scheduler.due(Task::Expire, now + Duration::from_secs(70)));
    }

    #[test]
    fn timers_are_independent() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new(now);

        assert!(scheduler.due(Task::Ping, now));

        let later = now + Duration::from_secs(10);
        assert!(scheduler.due(Task::Ping, later));
        assert!(scheduler.due(Task::RotateToken, later));
        assert!(!scheduler.due(Task::RotateToken, later + Duration::from_secs(10)));
    }
}
