pub mod calendar;
pub mod speech;
