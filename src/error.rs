//! Error types.
//!
//! Five kinds, matching the recovery policy in the spec: `Validation` and
//! `SchemaNonConformance`-shaped problems never emit a byte; `Protocol` and
//! `OutOfData` are fatal for the whole session; `Serializable` travels
//! through the multiplexer as a typed frame and does not kill the session;
//! `Internal` indicates a bug in this crate.

use std::fmt::{self, Display, Formatter};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Box<str>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// A value does not satisfy its schema's predicate. Reported before any
    /// bytes are written; the (en/de)coder state is unaffected.
    Validation,
    /// Decode-side violation of the wire format: unknown tag, bad flag,
    /// out-of-range union index, malformed varint, bad nullable/optional
    /// flag. Fatal for the session.
    Protocol,
    /// Transport ended while a reader expected more bytes. Delivered to
    /// every registered multiplexer handler's disconnect path. Fatal for
    /// the session.
    OutOfData,
    /// A user-defined error payload carried by a promise/iterator
    /// sub-stream. Not session-fatal; delivered to the one consumer.
    Serializable,
    /// An invariant of this crate was violated (plan/emit size mismatch,
    /// compression-table index out of range). Indicates a bug here, not in
    /// caller data.
    Internal,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, message: impl Into<String>, source: Option<E>) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error {
            kind,
            message: message.into().into_boxed_str(),
            source: source.map(Into::into),
        }
    }

    pub(crate) fn plain(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into().into_boxed_str(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Protocol | ErrorKind::OutOfData | ErrorKind::Internal)
    }

    /// Builds an [`ErrorKind::Serializable`] error carrying a typed payload
    /// a promise/iterator producer wants relayed to its one consumer (§4.7).
    pub fn serializable(schema: crate::schema::Schema, value: crate::value::Value) -> Self {
        let message = format!("serializable error of kind {:?}", schema.tag());
        Error { kind: ErrorKind::Serializable, message: message.into_boxed_str(), source: Some(Box::new(SerializableError { schema, value })) }
    }

    /// The schema/value payload of a `serializable` error, if this error was
    /// built via [`Error::serializable`] (or arrived as one over the wire).
    pub fn as_serializable(&self) -> Option<&SerializableError> {
        self.source.as_ref().and_then(|s| s.downcast_ref::<SerializableError>())
    }

    /// Builds the decode-side counterpart of [`Error::serializable`]: the
    /// error a promise/iterator consumer receives when the sub-stream's
    /// `Error` frame is decoded (§4.7, §7). Distinct type from
    /// [`SerializableError`] because the producer side builds its payload
    /// from a `Value` it's about to encode, while the consumer side decodes
    /// one into a [`crate::value::Decoded`] tree.
    pub fn received_serializable(schema: crate::schema::Schema, data: crate::value::Decoded) -> Self {
        let message = format!("serializable error of kind {:?}", schema.tag());
        Error { kind: ErrorKind::Serializable, message: message.into_boxed_str(), source: Some(Box::new(ReceivedError { schema, data })) }
    }

    /// The schema/data payload of a received serializable error, if this
    /// error arrived via [`Error::received_serializable`].
    pub fn as_received_serializable(&self) -> Option<&ReceivedError> {
        self.source.as_ref().and_then(|s| s.downcast_ref::<ReceivedError>())
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Validation => "validation error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::OutOfData => "out of data",
            ErrorKind::Serializable => "serializable error",
            ErrorKind::Internal => "internal error",
        })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " ({})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::OutOfData, "io error", Some(e))
    }
}

macro_rules! error {
    ($k:ident, $($e:tt)*) => {
        $crate::error::Error::plain(
            $crate::error::ErrorKind::$k,
            format!($($e)*),
        )
    };
}

macro_rules! bail {
    ($($e:tt)*) => { return Err(error!($($e)*)) };
}

macro_rules! ensure {
    ($c:expr, $($e:tt)*) => {
        if !$c {
            bail!($($e)*);
        }
    };
}

pub(crate) use bail;
pub(crate) use ensure;
pub(crate) use error;

/// The payload of a [`ErrorKind::Serializable`] error: the schema bytes of
/// the error type, plus the already-validated error value itself. Produced
/// when a promise/iterator sub-stream's producer rejects/errors, and
/// delivered to exactly the consumer of that sub-stream (§4.7, §7).
#[derive(Debug)]
pub struct SerializableError {
    pub schema: crate::schema::Schema,
    pub value: crate::value::Value,
}

impl Display for SerializableError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "serializable error: {:?}", self.value)
    }
}

impl std::error::Error for SerializableError {}

/// The decode-side payload of a [`ErrorKind::Serializable`] error: the
/// reflected schema of the error type plus the decoded error value itself,
/// delivered to exactly the consumer of the failing sub-stream (§4.7, §7).
#[derive(Debug)]
pub struct ReceivedError {
    pub schema: crate::schema::Schema,
    pub data: crate::value::Decoded,
}

impl Display for ReceivedError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "serializable error: {:?}", self.data)
    }
}

impl std::error::Error for ReceivedError {}
