use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] img2arr_registry::Error),

    #[error(transparent)]
    Dispatch(#[from] img2arr_dispatch::Error),

    #[error("preprocess step requested on a buffer the iterator has not claimed yet")]
    NoCurrentBuffer,

    #[error("plug-in {category}/{key} was scanned without its native module loaded")]
    NativeModuleNotLoaded { category: String, key: String },
}
