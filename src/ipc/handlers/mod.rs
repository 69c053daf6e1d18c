pub mod assessments;
pub mod core;
pub mod exports;
pub mod reports;
pub mod setup;
