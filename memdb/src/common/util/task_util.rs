use crate::SCHEDULER;
use std::time::Duration;
use timer::{Guard, Timer};

/// Handle to a repeating task. Dropping it cancels the task.
pub struct ScheduledTask {
    _guard: Guard,
}

/// Schedules `f` to run every `duration` on the shared scheduler thread.
///
/// Returns `None` if the duration cannot be represented by the timer.
#[inline]
pub fn schedule_task<F>(duration: Duration, f: F) -> Option<ScheduledTask>
where
    F: 'static + FnMut() + Send,
{
    SCHEDULER.schedule(duration, f)
}

pub(crate) struct Scheduler {
    timer: Timer,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            timer: Timer::new(),
        }
    }

    #[inline]
    pub fn schedule<F>(&self, duration: Duration, f: F) -> Option<ScheduledTask>
    where
        F: 'static + FnMut() + Send,
    {
        match chrono::Duration::from_std(duration) {
            Ok(chrono_duration) => {
                let guard = self.timer.schedule_repeating(chrono_duration, f);
                Some(ScheduledTask { _guard: guard })
            }
            Err(e) => {
                log::error!("Failed to convert duration to chrono::Duration: {}, skipping task scheduling", e);
                None
            }
        }
    }
}
