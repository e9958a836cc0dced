use std::{fmt, str::FromStr, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronScheduleError {
    #[error("empty schedule")]
    Empty,
    #[error("invalid interval {0:?}, expected <n>s, <n>m or <n>h")]
    InvalidInterval(String),
    #[error("unsupported cron expression {0:?}")]
    Unsupported(String),
}

/// How often a job runs. Accepts `@every <n>{s|m|h}`, `* * * * *` (every
/// minute) and `*/<n> * * * *` (every n minutes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSchedule {
    interval: Duration,
}

impl CronSchedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn parse_interval(raw: &str) -> Result<Duration, CronScheduleError> {
        let invalid = || CronScheduleError::InvalidInterval(raw.to_owned());
        let raw = raw.trim();
        let (split, _) = raw.char_indices().last().ok_or_else(invalid)?;
        let (amount, unit) = raw.split_at(split);
        let amount: u64 = amount.trim().parse().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }

        let seconds = match unit {
            "s" => amount,
            "m" => amount.checked_mul(60).ok_or_else(invalid)?,
            "h" => amount.checked_mul(3600).ok_or_else(invalid)?,
            _ => return Err(invalid()),
        };
        Ok(Duration::from_secs(seconds))
    }

    fn parse_fields(raw: &str) -> Result<Duration, CronScheduleError> {
        let unsupported = || CronScheduleError::Unsupported(raw.to_owned());
        let fields: Vec<&str> = raw.split_whitespace().collect();
        let [minute, "*", "*", "*", "*"] = fields.as_slice() else {
            return Err(unsupported());
        };

        let minutes = match *minute {
            "*" => 1,
            step => step
                .strip_prefix("*/")
                .and_then(|n| n.parse::<u64>().ok())
                .filter(|n| (1..60).contains(n))
                .ok_or_else(unsupported)?,
        };
        Ok(Duration::from_secs(minutes * 60))
    }
}

impl FromStr for CronSchedule {
    type Err = CronScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CronScheduleError::Empty);
        }

        let interval = match s.strip_prefix("@every") {
            Some(rest) => Self::parse_interval(rest)?,
            None => Self::parse_fields(s)?,
        };
        Ok(Self::every(interval))
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.interval.as_secs();
        if secs % 3600 == 0 {
            write!(f, "@every {}h", secs / 3600)
        } else if secs % 60 == 0 {
            write!(f, "@every {}m", secs / 60)
        } else {
            write!(f, "@every {secs}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_forms_parse_to_intervals() {
        assert_eq!(
            "@every 1m".parse::<CronSchedule>().unwrap().interval(),
            Duration::from_secs(60)
        );
        assert_eq!(
            "@every 45s".parse::<CronSchedule>().unwrap().interval(),
            Duration::from_secs(45)
        );
        assert_eq!(
            "@every 2h".parse::<CronSchedule>().unwrap().interval(),
            Duration::from_secs(7200)
        );
    }

    #[test]
    fn five_field_minute_forms_parse() {
        assert_eq!(
            "* * * * *".parse::<CronSchedule>().unwrap().interval(),
            Duration::from_secs(60)
        );
        assert_eq!(
            "*/5 * * * *".parse::<CronSchedule>().unwrap().interval(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn malformed_schedules_are_rejected() {
        assert_eq!("".parse::<CronSchedule>(), Err(CronScheduleError::Empty));
        assert!("@every 0m".parse::<CronSchedule>().is_err());
        assert!("@every 5d".parse::<CronSchedule>().is_err());
        assert!("@every".parse::<CronSchedule>().is_err());
        assert!("0 3 * * *".parse::<CronSchedule>().is_err());
        assert!("* *".parse::<CronSchedule>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for raw in ["@every 1m", "@every 90s", "@every 3h"] {
            let schedule: CronSchedule = raw.parse().unwrap();
            assert_eq!(schedule.to_string(), raw);
        }
    }
}
