//! Cron-scheduled transceiver health check

use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ControllerError, Result};

/// When to probe the transceiver
#[derive(Debug, Clone)]
pub struct HealthCheck {
    expression: String,
    schedule: Schedule,
}

impl HealthCheck {
    /// Parse a cron expression
    ///
    /// Five-field expressions (minute precision) get a leading seconds
    /// field of `0`; six and seven field expressions are taken as is.
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {}", trimmed)
        } else {
            trimmed.to_string()
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| ControllerError::Schedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Time until the next scheduled probe, `None` once the schedule is exhausted
    pub fn next_delay(&self) -> Option<Duration> {
        let now = Utc::now();
        let next = self.schedule.after(&now).next()?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}
