pub mod billing;
pub mod dashboard;
pub mod occupancy;
pub mod residency;
pub mod settings;
