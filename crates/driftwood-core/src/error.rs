use thiserror::Error;

/// Terminal failure of one stream generation.
///
/// A stream that errors is dead for good: the collection or rollup session it
/// fed reports the error and stops. Recovery is an explicit re-open
/// (`refresh()` / a fresh `get()` after purge), never an automatic retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The underlying source could not be opened.
    #[error("stream source unavailable: {0}")]
    Unavailable(String),
    /// The source dropped the stream before signalling completion.
    #[error("stream terminated: {0}")]
    Terminated(String),
}
