use std::path::{Path, PathBuf};

use confique::Config;
use serde::Deserialize;

/// Application settings, layered from an optional TOML file and the
/// environment. The defaults match the driver's installation layout.
#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub storage: StorageSettings,
    #[config(nested)]
    pub runtime: RuntimeSettings,
}

#[derive(Config, Debug, Clone)]
pub struct StorageSettings {
    /// Directory holding the driver configuration file.
    #[config(env = "MEIDC_CONFIG_DIR", default = "/etc/medriver")]
    pub config_dir: String,

    /// Name of the driver configuration file.
    #[config(env = "MEIDC_CONFIG_FILE", default = "meconfig.xml")]
    pub config_file: String,
}

#[derive(Config, Debug, Clone)]
pub struct RuntimeSettings {
    /// Use the simulated driver backend instead of the ME driver system.
    #[config(env = "MEIDC_SIMULATE", default = false)]
    pub simulate: bool,

    /// Log level filter.
    #[config(env = "MEIDC_LOG_LEVEL", default = "info")]
    pub log_level: LogLevel,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Off => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl Conf {
    pub fn load(file: Option<&Path>) -> Result<Self, confique::Error> {
        let mut builder = Conf::builder().env();
        if let Some(file) = file {
            builder = builder.file(file);
        }
        builder.load()
    }

    pub fn config_path(&self) -> PathBuf {
        Path::new(&self.storage.config_dir).join(&self.storage.config_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_driver_layout() {
        let conf = Conf::load(None).unwrap();
        assert_eq!(
            conf.config_path(),
            PathBuf::from("/etc/medriver/meconfig.xml")
        );
        assert!(!conf.runtime.simulate);
        assert_eq!(conf.runtime.log_level, LogLevel::Info);
    }
}
