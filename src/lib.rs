//! A schema-driven binary serialization codec with first-class support for
//! asynchronous and streaming values — deferred single values (`promise`),
//! finite/infinite value sequences (`iterator`), and raw byte streams
//! (`readable-stream`) — multiplexed in-band over a single ordered
//! transport alongside the value that contains them.
//!
//! Grounded on `binschema`'s schema/value/codec split (see `DESIGN.md` for
//! the full ledger); the async session and multiplexer layer has no
//! counterpart there and is instead grounded on the pack's async examples.
//!
//! ## Typical usage pattern
//!
//! Build a [`schema::Schema`], construct a [`value::Value`] that validates
//! against it, then hand both to [`session::encode_session`] along with a
//! transport implementing [`tokio::io::AsyncWrite`]:
//!
//! ```ignore
//! let schema = Schema::object(vec![
//!     ObjectField { name: "id".into(), schema: Schema::Uint },
//!     ObjectField { name: "name".into(), schema: Schema::Str },
//! ]);
//! let mut value = BTreeMap::new();
//! value.insert("id".into(), Value::Uint(7));
//! value.insert("name".into(), Value::Str("ok".into()));
//! session::encode_session(&schema, &Value::Object(value), None, socket, &SessionOptions::default()).await?;
//! ```
//!
//! On the other end, [`session::decode_session`] reads the header, the root
//! value, and spawns the background dispatcher that keeps any streaming
//! leaves inside that value fed until the session reaches quiescence.

pub mod asyncio;
pub mod compression;
pub mod date;
pub mod decode;
pub mod encode;
pub mod error;
pub mod read;
pub mod reflect;
pub mod schema;
pub mod session;
pub mod stream;
pub mod validate;
pub mod value;
pub mod varint;
pub mod write;

pub use error::{Error, ErrorKind, Result};
pub use schema::{ObjectField, Schema};
pub use session::{decode_from_bytes, decode_session, encode_session, encode_to_vec, SessionOptions, VecSink};
pub use value::{Decoded, Value};
