use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sysfs read failed: {path}: {source}")]
    SysfsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("state file error: {0}")]
    State(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("no carbon intensity provider for country '{0}'")]
    UnsupportedRegion(String),

    #[error("carbon intensity provider error: {0}")]
    Provider(String),

    #[error("signal handler installation failed: {0}")]
    Signal(#[from] nix::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
