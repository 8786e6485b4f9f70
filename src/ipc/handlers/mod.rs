pub mod assignments;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod planning;
pub mod rooms;
pub mod schedule;
pub mod sessions;
pub mod setup;
pub mod students;
