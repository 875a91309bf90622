use std::io;

#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the demuxer, the seek engine and the reader.
///
/// [`Error::EndOfStream`] is not a failure: it is the sentinel returned by
/// [`Reader::read`](crate::process::reader::Reader::read) once the stream is exhausted.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unexpected end of input")]
    UnexpectedEndOfInput,

    #[error("Malformed page: {0}")]
    MalformedPage(String),

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Unsupported stream: {0}")]
    UnsupportedStream(String),

    #[error("Byte source does not support random access")]
    NotSeekable,

    #[error("End of stream")]
    EndOfStream,

    #[error("Packet decode failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(io::Error),
}

impl Error {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    pub(crate) fn malformed_page(msg: impl Into<String>) -> Self {
        Error::MalformedPage(msg.into())
    }

    pub(crate) fn malformed_header(msg: impl Into<String>) -> Self {
        Error::MalformedHeader(msg.into())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::UnexpectedEndOfInput => Error::UnexpectedEndOfInput,
            Error::MalformedPage(msg) => Error::MalformedPage(msg.clone()),
            Error::MalformedHeader(msg) => Error::MalformedHeader(msg.clone()),
            Error::UnsupportedStream(msg) => Error::UnsupportedStream(msg.clone()),
            Error::NotSeekable => Error::NotSeekable,
            Error::EndOfStream => Error::EndOfStream,
            Error::Decode(msg) => Error::Decode(msg.clone()),
            // io::Error is not Clone
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::UnexpectedEndOfInput,
            _ => Error::Io(e),
        }
    }
}

#[test]
fn eof_maps_to_unexpected_end() {
    let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "short").into();
    assert!(matches!(err, Error::UnexpectedEndOfInput));

    let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
    assert!(matches!(err, Error::Io(_)));
    assert!(!err.is_end_of_stream());
    assert!(Error::EndOfStream.is_end_of_stream());
}
