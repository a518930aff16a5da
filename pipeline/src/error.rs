use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode image {path}: {source}")]
    DecodeFailed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Registry(#[from] img2arr_registry::Error),

    #[error(transparent)]
    Dispatch(#[from] img2arr_dispatch::Error),

    #[error(transparent)]
    Preprocess(#[from] img2arr_preprocess::Error),

    #[error("code/out node name must not be empty")]
    EmptyNodeName,
}
