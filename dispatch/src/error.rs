use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("plug-in {name:?} exposes neither f0/f1 nor f0p/f1p for the requested entry kind")]
    MissingWorker { name: String },

    #[error("querying output shape from {name:?} failed with code {code}")]
    ShapeQueryFailed { name: String, code: i32 },

    #[error("worker pool error while dispatching {name:?}: {source}")]
    Pool {
        name: String,
        #[source]
        source: img2arr_workerpool::Error,
    },
}
