use std::num::NonZeroUsize;

/// Default ceiling on workers when no override is given.
pub const DEFAULT_MAX_TASKS: usize = 8;

/// Worker budget for one instance run.
///
/// Every worker owns one SQL*Plus session, so the budget bounds both local
/// CPU use and the number of database sessions opened against the instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TaskBudget {
    /// Parallelism available on the collecting host.
    pub available: usize,
    /// `cpu_count` reported by the instance, if known.
    pub instance_cpus: Option<usize>,
}

impl TaskBudget {
    /// Budget using the host's available parallelism.
    pub fn detect(instance_cpus: Option<usize>) -> Self {
        let available = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(available, instance_cpus)
    }

    pub fn new(available: usize, instance_cpus: Option<usize>) -> Self {
        Self {
            available: available.max(1),
            instance_cpus: instance_cpus.filter(|&n| n > 0),
        }
    }

    /// Number of workers to start.
    ///
    /// `Some(0)` uses all available parallelism, `Some(n)` is clamped to
    /// `1..=available`, and `None` uses half the available parallelism
    /// capped at [`DEFAULT_MAX_TASKS`]. The result never exceeds the
    /// instance's CPU count and is always at least one.
    pub fn tasks(&self, requested: Option<usize>) -> usize {
        let tasks = match requested {
            Some(0) => self.available,
            Some(n) => n.clamp(1, self.available),
            None => (self.available / 2).clamp(1, DEFAULT_MAX_TASKS),
        };
        let tasks = match self.instance_cpus {
            Some(cpus) => tasks.min(cpus),
            None => tasks,
        };
        tasks.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_half_capped() {
        assert_eq!(TaskBudget::new(4, None).tasks(None), 2);
        assert_eq!(TaskBudget::new(64, None).tasks(None), 8);
        assert_eq!(TaskBudget::new(1, None).tasks(None), 1);
        assert_eq!(TaskBudget::new(3, None).tasks(None), 1);
    }

    #[test]
    fn test_zero_means_all_available() {
        assert_eq!(TaskBudget::new(16, None).tasks(Some(0)), 16);
        assert_eq!(TaskBudget::new(16, Some(4)).tasks(Some(0)), 4);
    }

    #[test]
    fn test_override_is_clamped() {
        let budget = TaskBudget::new(8, None);
        assert_eq!(budget.tasks(Some(3)), 3);
        assert_eq!(budget.tasks(Some(100)), 8);
    }

    #[test]
    fn test_instance_cpu_count_caps_pool() {
        assert_eq!(TaskBudget::new(32, Some(2)).tasks(None), 2);
        assert_eq!(TaskBudget::new(32, Some(0)).tasks(None), 8);
    }

    #[test]
    fn test_zero_available_is_treated_as_one() {
        let budget = TaskBudget::new(0, None);
        assert_eq!(budget.available, 1);
        assert_eq!(budget.tasks(Some(0)), 1);
    }
}
