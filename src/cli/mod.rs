//! Command implementations and terminal rendering

pub mod allocate;
pub mod report;
pub mod rules;
pub mod setup;
pub mod ui;
pub mod users;
