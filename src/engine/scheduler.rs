//! Poll scheduler
//!
//! Invoked once per host tick. Each active tick adds the elapsed time to every
//! group's poll timer; a group whose interval has elapsed gets a
//! [`Ticket::Poll`] on the work queue and a [`Notification::GroupPolled`].
//!
//! Once the startup grace period (measured from the first active tick) has
//! passed, a group whose tags have all completed their first read reports
//! [`Notification::GroupInitialized`], once per registration.
//!
//! The caller checks the gates. While comms or simulation is off it calls
//! [`PollScheduler::reset`], so the next active tick is a baseline with a
//! zero delta and the grace period starts over.

use super::events::{EventSender, Notification};
use super::registry::TagGroupRegistry;
use super::worker::Ticket;
use crate::queue::BlockingQueue;
use std::time::Instant;

/// What one scheduler pass did
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SchedulePass {
    /// Groups a poll ticket was enqueued for
    pub polled: Vec<String>,
    /// Groups that reported themselves fully initialized
    pub initialized: Vec<String>,
}

/// Tick-driven poll scheduler state
#[derive(Debug, Clone)]
pub struct PollScheduler {
    grace_ms: f64,
    last_tick: Option<Instant>,
    startup_elapsed_ms: f64,
}

impl PollScheduler {
    pub fn new(startup_grace_ms: u64) -> Self {
        Self {
            grace_ms: startup_grace_ms as f64,
            last_tick: None,
            startup_elapsed_ms: 0.0,
        }
    }

    /// Milliseconds since the previous tick; zero for the first one
    pub fn delta_ms(&mut self, now: Instant) -> f64 {
        let delta = match self.last_tick {
            Some(previous) => now.saturating_duration_since(previous).as_secs_f64() * 1000.0,
            None => 0.0,
        };
        self.last_tick = Some(now);
        delta
    }

    /// Forget the tick baseline and restart the grace period
    pub fn reset(&mut self) {
        self.last_tick = None;
        self.startup_elapsed_ms = 0.0;
    }

    /// Time accumulated since the first active tick
    pub fn startup_elapsed_ms(&self) -> f64 {
        self.startup_elapsed_ms
    }

    /// Whether the startup grace period is over
    pub fn grace_elapsed(&self) -> bool {
        self.startup_elapsed_ms >= self.grace_ms
    }

    /// Run one active pass over every registered group
    pub(crate) fn run(
        &mut self,
        delta_ms: f64,
        registry: &TagGroupRegistry,
        tickets: &BlockingQueue<Ticket>,
        events: &EventSender,
    ) -> SchedulePass {
        let delta_ms = if delta_ms.is_finite() && delta_ms > 0.0 {
            delta_ms
        } else {
            0.0
        };
        self.startup_elapsed_ms += delta_ms;

        let mut pass = SchedulePass::default();
        let check_initialized = self.grace_elapsed();

        for entry in registry.snapshot() {
            if entry.advance_timer(delta_ms) {
                tickets.push(Ticket::Poll(entry.name().to_string()));
                events.send(Notification::GroupPolled(entry.name().to_string()));
                pass.polled.push(entry.name().to_string());
            }

            if check_initialized
                && !entry.is_fully_initialized()
                && entry.initialized_tag_count() >= entry.tag_count()
                && entry.try_mark_fully_initialized()
            {
                tracing::debug!("Tag group {} is fully initialized", entry.name());
                events.send(Notification::GroupInitialized(entry.name().to_string()));
                pass.initialized.push(entry.name().to_string());
            }
        }

        pass
    }
}
