pub mod data;
pub mod io;

pub use data::{path_display, Config, LoggingConfig, Plan};
pub use io::ConfigError;
