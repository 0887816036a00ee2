pub mod core;
pub mod exports;
pub mod record;
pub mod reports;
pub mod setup;
pub mod students;
