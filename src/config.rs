use std::path::PathBuf;

use crate::consts;
use crate::error::{Error, Result};

/// Run options for an archive transformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory the extra (hook) class files are read from
    pub hook_classes_dir: PathBuf,
    /// Append the patch spec's extra entries to the output archive
    pub include_extra_entries: bool,
    /// Deflate level used for entries this tool writes itself
    pub compression_level: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hook_classes_dir: PathBuf::from(consts::DEFAULT_HOOK_CLASSES_DIR),
            include_extra_entries: true,
            compression_level: consts::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl Config {
    pub fn with_hook_classes_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hook_classes_dir = dir.into();
        self
    }

    pub fn with_extra_entries(mut self, include: bool) -> Self {
        self.include_extra_entries = include;
        self
    }

    pub fn with_compression_level(mut self, level: i64) -> Self {
        self.compression_level = level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=9).contains(&self.compression_level) {
            return Err(Error::config_error(format!(
                "compression level {} is outside 0..=9",
                self.compression_level
            )));
        }
        Ok(())
    }
}
