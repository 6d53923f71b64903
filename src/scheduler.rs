//! Drift-correcting scheduling and the engine tick loop.
//!
//! One tokio task runs the loop exclusively; it is the only writer of the
//! session handle and the pending-subscription set. A tick is: ensure a live
//! session, run the resubscription pass, run every query, then sleep until
//! the next planned iteration.
//!
//! The client primitives can block on network I/O, so each tick runs on the
//! blocking pool via `spawn_blocking`; the runtime thread only ever executes
//! the cancellable waits between ticks.
//!
//! The schedule is a single logical timeline. `next_iteration` starts at
//! `now + interval` and advances by exactly one interval per tick. When a
//! tick overruns its slot, the overshot iterations are skipped (never run
//! late) and the timeline jumps forward so the loop does not drift
//! permanently behind.
//!
//! Failure ladder per tick: a stop request breaks the loop cleanly; a
//! transport error discards the session, resets the pending subscriptions,
//! and pauses briefly before retrying; anything else is logged and the
//! schedule continues unaffected.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, RegistryClient, RegistrySession};
use crate::config::PipeConfig;
use crate::connection::ConnectionManager;
use crate::event::{EventSink, FieldMap, FieldValue};
use crate::query::QueryExecutor;
use crate::subscribe::NotificationSubscriber;

/// Pause after a detected connection loss before the next attempt.
pub const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

// ============================================================================
// Schedule
// ============================================================================

/// What to do between the tick that just finished and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDelay {
    /// Sleep this long; the next iteration is still in the future.
    Wait(Duration),
    /// The tick overran its slot: run the next iteration immediately.
    Overrun {
        /// How far past the planned time the tick finished.
        overshoot: Duration,
        /// Whole iterations skipped to catch the timeline up.
        skipped: u32,
    },
}

/// Fixed-interval timeline with overrun correction.
#[derive(Debug, Clone)]
pub struct Schedule {
    interval: Duration,
    next_iteration: Instant,
}

impl Schedule {
    /// Starts a schedule whose first iteration is due one interval from now.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    /// Starts a schedule relative to an explicit origin.
    #[must_use]
    pub fn starting_at(interval: Duration, origin: Instant) -> Self {
        Self {
            interval,
            next_iteration: origin + interval,
        }
    }

    /// Plans the delay before the next iteration, as of `now`.
    ///
    /// Finishing exactly on the boundary is an immediate run, not an overrun.
    /// On overrun, the planned time jumps forward by the number of whole
    /// intervals missed, so at most one (the current) iteration executes for
    /// the overrun period.
    pub fn plan(&mut self, now: Instant) -> TickDelay {
        if let Some(wait) = self.next_iteration.checked_duration_since(now) {
            return TickDelay::Wait(wait);
        }

        let overshoot = now.duration_since(self.next_iteration);
        let skipped = if self.interval.is_zero() {
            0
        } else {
            u32::try_from(overshoot.as_nanos() / self.interval.as_nanos()).unwrap_or(u32::MAX)
        };
        self.next_iteration += self.interval * skipped;
        TickDelay::Overrun { overshoot, skipped }
    }

    /// Advances the timeline by one interval; call once per tick, whichever
    /// branch `plan` took.
    pub fn advance(&mut self) {
        self.next_iteration += self.interval;
    }

    /// The planned time of the next iteration.
    #[must_use]
    pub fn next_iteration(&self) -> Instant {
        self.next_iteration
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Owns all mutable polling state touched by blocking client calls.
///
/// Moved into `spawn_blocking` for each tick and handed back afterwards, so
/// the connect/fetch/subscribe primitives never run on a runtime worker
/// thread. Notification handlers hold their own copies of the immutable
/// pieces they need.
struct Poller {
    config: PipeConfig,
    client: Box<dyn RegistryClient>,
    sink: Arc<dyn EventSink>,
    connection: ConnectionManager,
    subscriber: NotificationSubscriber,
    context: FieldMap,
    session: Option<Box<dyn RegistrySession>>,
}

impl Poller {
    /// One poll-and-resubscribe cycle.
    fn tick(&mut self) -> Result<(), ClientError> {
        if self.session.is_none() {
            self.session = Some(self.connection.connect(self.client.as_ref())?);
        }
        let Some(session) = self.session.as_deref() else {
            return Ok(());
        };

        self.subscriber.resubscribe(session)?;

        let executor = QueryExecutor::new(
            &self.config.host,
            &self.context,
            self.config.emit_on_no_match,
            self.sink.as_ref(),
        );
        for query in &self.config.queries {
            executor.execute(session, query)?;
        }
        Ok(())
    }

    /// Discards a dead session; listeners attached to it are unrecoverable,
    /// so the pending-subscription set is reset too.
    fn disconnect(&mut self) {
        self.session = None;
        self.subscriber.reset();
    }
}

/// Runs the tick loop until stopped.
///
/// Passed by value into the spawned task; nothing here is shared with any
/// other task.
pub(crate) struct Engine {
    cancel: CancellationToken,
    schedule: Schedule,
    poller: Poller,
}

impl Engine {
    pub(crate) fn new(
        config: PipeConfig,
        client: Box<dyn RegistryClient>,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Self {
        let context: FieldMap = config
            .event_context
            .iter()
            .map(|(k, v)| (k.clone(), FieldValue::Text(v.clone())))
            .collect();
        let connection = ConnectionManager::new(&config);
        let subscriber = NotificationSubscriber::new(
            config.subscriptions.clone(),
            config.host.clone(),
            context.clone(),
            Arc::clone(&sink),
        );
        let schedule = Schedule::new(config.interval);

        Self {
            cancel,
            schedule,
            poller: Poller {
                config,
                client,
                sink,
                connection,
                subscriber,
                context,
                session: None,
            },
        }
    }

    /// Runs the loop until stopped.
    pub(crate) async fn run(self) {
        let Self {
            cancel,
            mut schedule,
            mut poller,
        } = self;

        info!(
            host = %poller.config.host,
            port = poller.config.port,
            interval_ms = poller.config.interval.as_millis() as u64,
            queries = poller.config.queries.len(),
            subscriptions = poller.config.subscriptions.len(),
            "poll engine starting"
        );

        while !cancel.is_cancelled() {
            let join = tokio::task::spawn_blocking(move || {
                let result = poller.tick();
                (poller, result)
            })
            .await;
            let result = match join {
                Ok((returned, result)) => {
                    poller = returned;
                    result
                }
                Err(e) => {
                    error!(error = %e, "tick task aborted");
                    break;
                }
            };

            match result {
                Ok(()) => sleep_until_next_iteration(&cancel, &mut schedule).await,
                Err(e) if poller.connection.is_lost(&e) => {
                    error!(error = %e, "connection lost; reconnecting after a short pause");
                    poller.disconnect();
                    pause(&cancel, RECONNECT_PAUSE).await;
                }
                Err(e) => {
                    error!(error = %e, "tick failed");
                    sleep_until_next_iteration(&cancel, &mut schedule).await;
                }
            }
        }

        info!("poll engine stopped");
    }
}

/// Drift-aware sleep, interruptible by a stop request.
async fn sleep_until_next_iteration(cancel: &CancellationToken, schedule: &mut Schedule) {
    match schedule.plan(Instant::now()) {
        TickDelay::Wait(wait) => {
            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "sleeping until next iteration");
                pause(cancel, wait).await;
            }
        }
        TickDelay::Overrun { overshoot, skipped } => {
            warn!(
                overshoot_ms = overshoot.as_millis() as u64,
                skipped,
                "overshot planned iteration time; querying immediately"
            );
        }
    }
    schedule.advance();
}

/// Sleeps, waking early on a stop request.
async fn pause(cancel: &CancellationToken, duration: Duration) {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(10);

    #[test]
    fn test_first_iteration_is_one_interval_out() {
        let origin = Instant::now();
        let schedule = Schedule::starting_at(INTERVAL, origin);
        assert_eq!(schedule.next_iteration(), origin + INTERVAL);
    }

    #[test]
    fn test_on_time_tick_waits_the_remainder() {
        let origin = Instant::now();
        let mut schedule = Schedule::starting_at(INTERVAL, origin);

        let delay = schedule.plan(origin + Duration::from_secs(3));
        assert_eq!(delay, TickDelay::Wait(Duration::from_secs(7)));

        schedule.advance();
        assert_eq!(schedule.next_iteration(), origin + INTERVAL * 2);
    }

    #[test]
    fn test_small_overrun_skips_nothing() {
        let origin = Instant::now();
        let mut schedule = Schedule::starting_at(INTERVAL, origin);

        // Finished 4s late: less than one interval, so no skips.
        let delay = schedule.plan(origin + Duration::from_secs(14));
        assert_eq!(
            delay,
            TickDelay::Overrun {
                overshoot: Duration::from_secs(4),
                skipped: 0
            }
        );

        schedule.advance();
        assert_eq!(schedule.next_iteration(), origin + INTERVAL * 2);
    }

    #[test]
    fn test_large_overrun_catches_timeline_up() {
        let origin = Instant::now();
        let mut schedule = Schedule::starting_at(INTERVAL, origin);

        // Finished 25s past the planned time: 2 whole iterations missed.
        let now = origin + INTERVAL + Duration::from_secs(25);
        let delay = schedule.plan(now);
        assert_eq!(
            delay,
            TickDelay::Overrun {
                overshoot: Duration::from_secs(25),
                skipped: 2
            }
        );

        // The timeline is back within one interval of now.
        schedule.advance();
        let next = schedule.next_iteration();
        assert!(next > now);
        assert!(next <= now + INTERVAL);
    }

    #[test]
    fn test_exact_boundary_runs_immediately_without_overrun() {
        let origin = Instant::now();
        let mut schedule = Schedule::starting_at(INTERVAL, origin);

        // Zero remaining time is not late: no skips, no overrun warning.
        let delay = schedule.plan(origin + INTERVAL);
        assert_eq!(delay, TickDelay::Wait(Duration::ZERO));

        schedule.advance();
        assert_eq!(schedule.next_iteration(), origin + INTERVAL * 2);
    }
}
