//! Scheduler: a small job table driven by a tick loop.
//!
//! Each job has a cron expression (parsed from a human-friendly schedule
//! string or raw cron) and a precomputed next occurrence in local time. The
//! tick loop fires due jobs by sending their kind over an mpsc channel to the
//! runtime, which invokes the same entry points the manual /scan command
//! uses. Missed occurrences are not replayed: each fire recomputes the next
//! future occurrence.

use chrono::{DateTime, Local};
use croner::Cron;
use regex::Regex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::types::JobKind;

struct Job {
    name: &'static str,
    cron_expr: String,
    kind: JobKind,
    next_run_at: DateTime<Local>,
}

pub struct Scheduler {
    jobs: Vec<Job>,
    tick_interval: Duration,
    sender: mpsc::Sender<JobKind>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, sender: mpsc::Sender<JobKind>) -> anyhow::Result<Self> {
        let mut jobs = Vec::new();
        for (name, schedule, kind) in [
            ("daily", &config.daily, JobKind::Daily),
            ("hourly_digest", &config.hourly, JobKind::HourlyDigest),
        ] {
            let cron_expr = parse_schedule(schedule)?;
            let next_run_at = compute_next_run(&cron_expr)?;
            info!(name, cron = %cron_expr, next = %next_run_at, "Scheduled job");
            jobs.push(Job {
                name,
                cron_expr,
                kind,
                next_run_at,
            });
        }
        Ok(Self {
            jobs,
            tick_interval: Duration::from_secs(config.tick_interval_secs),
            sender,
        })
    }

    /// Start the tick loop as a background task.
    pub fn spawn(mut self) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.tick_interval).await;
                self.tick(Local::now()).await;
            }
        });
        info!("Scheduler spawned");
    }

    /// Fire every due job and advance its next occurrence.
    async fn tick(&mut self, now: DateTime<Local>) {
        for job in &mut self.jobs {
            if job.next_run_at > now {
                continue;
            }

            if self.sender.send(job.kind).await.is_err() {
                warn!(name = job.name, "No job receiver active — dropping fire");
            } else {
                info!(name = job.name, "Fired scheduled job");
            }

            match compute_next_run(&job.cron_expr) {
                Ok(next) => job.next_run_at = next,
                Err(e) => {
                    // Push far into the future rather than hot-looping.
                    error!(name = job.name, error = %e, "Failed to compute next run");
                    job.next_run_at = now + chrono::Duration::days(365);
                }
            }
        }
    }
}

/// Parse a human-friendly schedule string into a 5-field cron expression.
/// Supports keyword shortcuts and raw cron pass-through.
pub fn parse_schedule(input: &str) -> anyhow::Result<String> {
    let input = input.trim();

    match input.to_lowercase().as_str() {
        "hourly" => return Ok("0 * * * *".to_string()),
        "daily" => return Ok("0 0 * * *".to_string()),
        "weekly" => return Ok("0 0 * * 0".to_string()),
        _ => {}
    }

    // "every Nm" / "every N minutes"
    let re_minutes = Regex::new(r"(?i)^every\s+(\d+)\s*(?:m|min|mins|minutes?)$")?;
    if let Some(caps) = re_minutes.captures(input) {
        let n: u32 = caps[1].parse()?;
        if n == 0 || n > 59 {
            anyhow::bail!("Minutes interval must be between 1 and 59");
        }
        return Ok(format!("*/{} * * * *", n));
    }

    // "every Nh" / "every N hours"
    let re_hours = Regex::new(r"(?i)^every\s+(\d+)\s*(?:h|hrs?|hours?)$")?;
    if let Some(caps) = re_hours.captures(input) {
        let n: u32 = caps[1].parse()?;
        if n == 0 || n > 23 {
            anyhow::bail!("Hours interval must be between 1 and 23");
        }
        return Ok(format!("0 */{} * * *", n));
    }

    // "daily at 9am" / "daily at 14:30" / "daily at 2:30pm"
    let re_daily = Regex::new(r"(?i)^daily\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$")?;
    if let Some(caps) = re_daily.captures(input) {
        let (hour, minute) = parse_time_captures(&caps)?;
        return Ok(format!("{} {} * * *", minute, hour));
    }

    // "weekdays at 8:30" / "weekdays at 9am"
    let re_weekdays = Regex::new(r"(?i)^weekdays?\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$")?;
    if let Some(caps) = re_weekdays.captures(input) {
        let (hour, minute) = parse_time_captures(&caps)?;
        return Ok(format!("{} {} * * 1-5", minute, hour));
    }

    // Raw cron pass-through, validated with croner.
    let parts: Vec<&str> = input.split_whitespace().collect();
    if parts.len() == 5 {
        input
            .parse::<Cron>()
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", input, e))?;
        return Ok(input.to_string());
    }

    anyhow::bail!(
        "Unrecognized schedule format '{}'. Use shortcuts (e.g. 'daily at 9am', 'every 5m') or a 5-field cron expression.",
        input
    )
}

/// Extract hour and minute from regex captures with optional AM/PM.
fn parse_time_captures(caps: &regex::Captures) -> anyhow::Result<(u32, u32)> {
    let mut hour: u32 = caps[1].parse()?;
    let minute: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse())?;
    if let Some(ampm) = caps.get(3) {
        let ampm = ampm.as_str().to_lowercase();
        if ampm == "pm" && hour < 12 {
            hour += 12;
        } else if ampm == "am" && hour == 12 {
            hour = 0;
        }
    }
    if hour > 23 {
        anyhow::bail!("Hour must be between 0 and 23");
    }
    if minute > 59 {
        anyhow::bail!("Minute must be between 0 and 59");
    }
    Ok((hour, minute))
}

/// Compute the next occurrence of a cron expression in local time.
pub fn compute_next_run(cron_expr: &str) -> anyhow::Result<DateTime<Local>> {
    let cron: Cron = cron_expr
        .parse()
        .map_err(|e| anyhow::anyhow!("Failed to parse cron '{}': {}", cron_expr, e))?;

    cron.find_next_occurrence(&Local::now(), false)
        .map_err(|e| anyhow::anyhow!("No next occurrence for '{}': {}", cron_expr, e))
}
