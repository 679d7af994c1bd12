//! Cron job scheduling.
//!
//! Cron handler declarations are turned into background timer tasks at load
//! time. Each task owns a [`JobHandle`]; cancelling the handle stops the
//! task before its next fire. Expressions use the 5-field crontab form and
//! are padded with a seconds field, but a full 6-field expression is
//! accepted as-is.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::ScheduleError;

/// The job body invoked on every fire.
pub type JobFn = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Scoped ownership of one scheduled job. Cancelling stops the timer task.
pub struct JobHandle {
    token: CancellationToken,
}

impl JobHandle {
    pub fn cancel(self) {
        self.token.cancel();
    }

    #[cfg(test)]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Schedules jobs from cron expressions.
pub trait JobScheduler: Send + Sync {
    fn schedule(&self, expr: &str, job: JobFn) -> Result<JobHandle, ScheduleError>;
}

/// A shared scheduler trait object.
pub type BoxedScheduler = Arc<dyn JobScheduler>;

/// Tokio-timer based scheduler.
#[derive(Default)]
pub struct CronScheduler;

impl CronScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Parses `expr`, padding 5-field crontab expressions with a zero
    /// seconds field.
    fn parse(expr: &str) -> Result<Schedule, ScheduleError> {
        Schedule::from_str(expr)
            .or_else(|_| Schedule::from_str(&format!("0 {expr}")))
            .map_err(|source| ScheduleError::Parse {
                expr: expr.to_string(),
                source,
            })
    }
}

impl JobScheduler for CronScheduler {
    fn schedule(&self, expr: &str, job: JobFn) -> Result<JobHandle, ScheduleError> {
        let schedule = Self::parse(expr)?;
        if schedule.upcoming(Utc).next().is_none() {
            return Err(ScheduleError::NeverFires(expr.to_string()));
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let expr = expr.to_string();
        tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    break;
                };
                let delay = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {
                        trace!(expr = %expr, "cron job fired");
                        job().await;
                    }
                }
            }
        });
        Ok(JobHandle { token })
    }
}
