pub mod academic_years;
pub mod assistant;
pub mod attendance;
pub mod core;
pub mod dashboard;
pub mod events;
pub mod exchange;
pub mod fees;
pub mod pdc;
pub mod records;
pub mod setup;
pub mod timetable;
