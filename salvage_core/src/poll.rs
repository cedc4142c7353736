use std::time::Duration;

/// Bounds the wait for asynchronously written crash evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Chooses a [`PollPolicy`] from the name of the crashed process.
///
/// Crash reporters take longer for the big primary targets than for
/// auxiliary tools, so those get the larger attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    /// A process is primary when its name starts with one of these.
    pub primary_programs: Vec<String>,
    pub primary_max_attempts: u32,
    pub auxiliary_max_attempts: u32,
}

impl PollBudget {
    pub fn is_primary(&self, process_name: &str) -> bool {
        self.primary_programs
            .iter()
            .any(|prefix| process_name.starts_with(prefix.as_str()))
    }

    pub fn policy_for(&self, process_name: &str) -> PollPolicy {
        let max_attempts = if self.is_primary(process_name) {
            self.primary_max_attempts
        } else {
            self.auxiliary_max_attempts
        };
        PollPolicy::new(self.interval, max_attempts)
    }
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            primary_programs: vec!["firefox".to_string(), "js".to_string()],
            primary_max_attempts: 500,
            auxiliary_max_attempts: 30,
        }
    }
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_programs_get_the_larger_budget() {
        let budget = PollBudget::default();

        let firefox = budget.policy_for("firefox-bin");
        assert_eq!(firefox.max_attempts, 500);
        assert_eq!(firefox.interval, Duration::from_millis(200));

        assert_eq!(budget.policy_for("js").max_attempts, 500);
        assert_eq!(budget.policy_for("xpcshell").max_attempts, 30);
    }

    #[test]
    fn empty_primary_list_treats_everything_as_auxiliary() {
        let budget = PollBudget {
            primary_programs: Vec::new(),
            ..Default::default()
        };
        assert!(!budget.is_primary("firefox"));
        assert_eq!(budget.policy_for("firefox").max_attempts, 30);
    }
}
