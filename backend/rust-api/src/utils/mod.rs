pub mod calendar;
pub mod retry;
pub mod time;
