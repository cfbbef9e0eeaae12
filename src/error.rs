use thiserror::Error;

/// Errors produced by the pipeline, plan builder, and wire codec.
#[derive(Error, Debug)]
pub enum XddError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("target configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("lockstep error: {0}")]
    Lockstep(String),

    #[error("DIO reopen failed for target {target}: {source}")]
    DioReopen {
        target: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("run aborted")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, XddError>;
