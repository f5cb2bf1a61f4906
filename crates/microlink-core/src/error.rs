use thiserror::Error;

/// Errors surfaced by the link manager.
///
/// Mid-operation I/O trouble is absent on purpose: the link is a best-effort
/// channel, so those come back as sentinel strings or `false` from the
/// operation that hit them, never as faults.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The port could not be opened (missing, busy, or no permission).
    #[error("failed to open {port}: {source}")]
    Connect {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// An operation that needs an open session found none.
    #[error("not connected; open a port first")]
    NotConnected,

    /// Transport-level read or write failure.
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
