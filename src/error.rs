use failure::Fail;

/// Everything that can go wrong while acquiring samples.
///
/// Only the one-shot `get_samples` path and construction ever hand these to a
/// caller. The producer loop logs them and folds them into the per-frame
/// overflow flag instead.
#[derive(Debug, Fail)]
pub enum SourceError {
    /// The transport could not be opened or connected.
    #[fail(display = "could not open sample source {}: {}", locator, reason)]
    Connection { locator: String, reason: String },

    /// The file backend could not produce the requested count, even after
    /// rewinding.
    #[fail(display = "unable to read enough samples from file: got {} of {}", got, wanted)]
    ShortRead { wanted: usize, got: usize },

    /// The stream backend saw a receive that produced no samples before the
    /// requested count was reached.
    #[fail(display = "unable to receive enough samples from stream: got {} of {}", got, wanted)]
    ShortReceive { wanted: usize, got: usize },

    /// A single receive failed on the stream transport.
    #[fail(display = "transport error: {}", _0)]
    Transport(String),

    #[fail(display = "ring buffer capacity must be at least one frame")]
    InvalidCapacity,
}

impl SourceError {
    pub(crate) fn connection(locator: impl Into<String>, reason: impl ToString) -> SourceError {
        SourceError::Connection {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}
