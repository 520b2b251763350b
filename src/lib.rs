//! Wellness scoring for the Urban Blue Zone program: vitals statistics,
//! habit averages, the UBZI composite, threshold alerts, habit streaks and
//! cohort roll-ups.

pub mod alerts;
pub mod cohorts;
pub mod config;
pub mod db;
pub mod error;
pub mod habits;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod streaks;
pub mod ubzi;
pub mod vitals;

pub use error::{EngineError, Result};
