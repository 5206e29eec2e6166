//! Post-execution status check: poll the broker until submitted orders settle.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rebal::{BrokerSnapshot, OrderSubmission, VerificationReport, reconcile};

use crate::broker::BrokerGateway;
use crate::config::Config;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct StatusOptions {
    /// Total time to keep observing the broker.
    pub window: Duration,
    pub poll_interval: Duration,
    /// Wait for each order/position dump.
    pub refresh_timeout: Duration,
}

impl StatusOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: Duration::from_secs(config.status.observation_window_secs),
            poll_interval: Duration::from_millis(config.status.poll_interval_ms),
            refresh_timeout: Duration::from_millis(config.status.refresh_timeout_ms),
        }
    }
}

/// Reconcile `submissions` against broker state until every order settles or
/// the observation window closes.
///
/// Broker state accumulates across polls, so an order seen once stays
/// matched even if a later dump omits it. A refresh failure ends the window
/// early with the last report; if no refresh ever succeeded, every order is
/// reconciled against an empty snapshot and reported missing with a diagnosis.
pub fn check_status(
    gateway: &dyn BrokerGateway,
    submissions: &[OrderSubmission],
    opts: &StatusOptions,
) -> Result<VerificationReport> {
    let deadline = Instant::now() + opts.window;
    let mut observed = BrokerSnapshot::default();
    let mut last: Option<VerificationReport> = None;
    let mut polls = 0u32;

    loop {
        match gateway.refresh(opts.refresh_timeout) {
            Ok(snapshot) => observed.absorb(&snapshot),
            Err(e) => {
                return Ok(match last {
                    Some(report) => {
                        warn!("Broker refresh failed after {polls} polls: {e}");
                        report
                    }
                    None => {
                        warn!("Broker refresh failed before any snapshot arrived: {e}");
                        reconcile(submissions, &observed)
                    }
                });
            }
        }
        polls += 1;

        let report = reconcile(submissions, &observed);
        debug!(
            "Poll {polls}: {}/{} matched, {} filled",
            report.matched, report.total, report.filled
        );

        let now = Instant::now();
        if report.is_settled() || now >= deadline {
            info!(
                "Status check done after {polls} polls: {}/{} matched, {} missing",
                report.matched, report.total, report.missing
            );
            return Ok(report);
        }
        last = Some(report);
        thread::sleep(opts.poll_interval.min(deadline - now));
    }
}
