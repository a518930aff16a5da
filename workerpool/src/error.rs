use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("worker pool already shut down")]
    PoolShutDown,

    #[error("a worker thread panicked during run()")]
    WorkerPanicked,
}
