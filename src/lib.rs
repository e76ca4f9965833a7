pub mod clock;
pub mod coalescer;
pub mod config;
pub mod fanout;
pub mod logging;
pub mod metrics;
pub mod params;
pub mod persistence;
pub mod platform;
pub mod serial;
pub mod state;
pub mod supervisor;
pub mod template;

pub use config::AppConfig;
pub use supervisor::Supervisor;
