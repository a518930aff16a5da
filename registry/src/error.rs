//! Error taxonomy for the registry (§7 of the spec: `PLUGIN_NOT_FOUND`,
//! `INVALID_SIGNATURE`, `MISSING_SYMBOL`, `INIT_FAILED`, `BAD_INFO_JSON`).

use crate::Stage;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown plug-in {stage:?}/{category}/{key}")]
    PluginNotFound {
        stage: Stage,
        category: String,
        key: String,
    },

    #[error("{path}: signature {found:?} does not start with expected prefix {expected_prefix:?}")]
    InvalidSignature {
        path: PathBuf,
        found: String,
        expected_prefix: String,
    },

    #[error("{path}: missing required symbol {symbol}")]
    MissingSymbol { path: PathBuf, symbol: &'static str },

    #[error("{path}: init() returned nonzero status {code}")]
    InitFailed { path: PathBuf, code: i32 },

    #[error("{path}: failed to load native module: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("{path}: malformed info.json: {message}")]
    BadInfoJson { path: PathBuf, message: String },

    #[error("{0}: not found")]
    NativeModuleMissing(PathBuf),

    #[error("unsupported platform for native plug-in loading: {0}")]
    UnsupportedPlatform(String),

    #[error("{0}: I/O error: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}
