mod settings;

pub use settings::{Config, ConfigError, ServerSettings, TomlConfig, EXAMPLE_CONFIG};
