//! Infrastructure error type.

use thiserror::Error;

/// A boxed, thread-safe error. Handlers and phase functions may fail with
/// anything that converts into this.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by gatehouse's fallible setup and serving operations.
///
/// Request-level failures (404, 422, etc.) are expressed as responses or as
/// [`AppError`](crate::AppError) values, not as `Error`s. This type surfaces
/// infrastructure failures: resolving or binding the listen address, accepting
/// connections, installing the log subscriber, or talking to a peer whose
/// WebSocket session has already ended.
#[derive(Debug, Error)]
pub enum Error {
    /// The listen address could not be parsed.
    #[error("invalid listen address `{addr}`: {reason}")]
    Address {
        /// Address as supplied by the caller.
        addr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was being bound.
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A message was sent to a WebSocket peer whose session has ended.
    #[error("websocket connection closed")]
    ConnectionClosed,

    /// A global `tracing` subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Logging(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_the_address() {
        let err = Error::Bind {
            addr: "0.0.0.0:80".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let message = err.to_string();
        assert!(message.contains("0.0.0.0:80"), "unexpected message: {message}");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
