// CodeCast - periodic multi-perspective code review reports
// Library exports

pub mod changes;
pub mod config;
pub mod generation;
pub mod habits;
pub mod logging;
pub mod memory;
pub mod personas;
pub mod results;
pub mod retry;
pub mod review;
pub mod runner;
pub mod selector;
pub mod workflow;
