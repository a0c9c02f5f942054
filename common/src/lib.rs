pub mod config_file;
pub mod log_setup;

pub use config_file::{load_config, ConfigFileError, ConfigFormat};
