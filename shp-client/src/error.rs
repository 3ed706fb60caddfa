//! Error handling in [`shp_client`][crate]
use thiserror::Error;

/// Possible errors when talking to the cluster
#[derive(Error, Debug)]
pub enum Error {
    /// The kube client failed
    #[cfg(feature = "kube-client")]
    #[error("ApiError: {0}")]
    Api(#[source] kube::Error),

    /// The server sent an error in-band on a watch stream
    #[error("watch error {code}: {message}")]
    Watch {
        /// HTTP status code
        code: u16,
        /// Message
        message: String,
    },

    /// Reading a log stream failed
    #[error("failed to read log stream: {0}")]
    Read(#[source] std::io::Error),

    /// A failure injected by a test double
    #[error("{0}")]
    Injected(String),
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
