pub mod actors;
pub mod checks;
pub mod config;
pub mod hooks;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod queue;
pub mod shared;
pub mod util;
