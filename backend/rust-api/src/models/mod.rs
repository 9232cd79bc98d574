pub mod activity;
pub mod streak;

pub use activity::{ActivityRecord, LifetimeCounters};
pub use streak::{DaySummary, StreakRecord, WeekSummary, WeekdayStat};
