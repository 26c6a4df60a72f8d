//! End-to-end session tests: a sender and receiver talking over
//! `tokio::io::duplex`, covering the streaming leaves (§4.7) and the
//! header's schema-digest optimization (§4.8) together rather than in
//! isolation, since the interesting behavior is how they compose over one
//! live transport.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;

use wireschema::decode::DecodeCtx;
use wireschema::schema::{ObjectField, Schema};
use wireschema::session::{decode_from_bytes, decode_session, encode_session, encode_to_vec, SessionOptions};
use wireschema::value::{BoxFuture, ByteStreamProducer, Decoded, IteratorHandle, IteratorProducer, ProducerResult, PromiseProducer, ReadableStreamHandle, Value};
use wireschema::{Error, ErrorKind};

/// Surfaces this crate's `tracing::debug!`/`warn!` lifecycle logging (mux
/// channel open/close, quiescence, slurp-release fallbacks) on test
/// failure, same as `cargo test -- --nocapture` against a service that
/// logs through `tracing` rather than `println!`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
}

fn counter_object_schema() -> Schema {
    Schema::object(vec![
        ObjectField { name: "id".into(), schema: Schema::Uint },
        ObjectField { name: "name".into(), schema: Schema::Str },
    ])
}

fn counter_object_value(id: u64, name: &str) -> Value {
    let mut map = BTreeMap::new();
    map.insert("id".to_string(), Value::Uint(id));
    map.insert("name".to_string(), Value::Str(name.to_string()));
    Value::Object(map)
}

#[tokio::test]
async fn plain_value_round_trips_with_header_optimization() {
    init_tracing();
    let schema = counter_object_schema();
    let value = counter_object_value(7, "ok");

    let without_digest = encode_to_vec(&schema, &value, None, &SessionOptions::default()).await.unwrap();
    assert_eq!(without_digest[0], 0x01);
    assert_eq!(&without_digest[1..1 + schema.to_bytes().len()], schema.to_bytes().as_slice());

    let value2 = counter_object_value(7, "ok");
    let with_digest = encode_to_vec(&schema, &value2, Some(schema.digest()), &SessionOptions::default()).await.unwrap();
    assert_eq!(with_digest[0], 0x00);

    let (_schema, decoded) = decode_from_bytes(Some(&schema), Bytes::from(with_digest), &SessionOptions::default()).await.unwrap();
    match decoded {
        Decoded::Object(fields) => {
            assert!(matches!(fields.get("id"), Some(Decoded::Uint(7))));
            assert!(matches!(fields.get("name"), Some(Decoded::Str(s)) if s == "ok"));
        }
        other => panic!("expected Decoded::Object, got {other:?}"),
    }
}

#[tokio::test]
async fn promise_resolves_to_success_value() {
    init_tracing();
    let (client, server) = tokio::io::duplex(4096);

    let send = tokio::spawn(async move {
        let schema = Schema::promise(Schema::Str);
        let value = Value::Promise(PromiseProducer::new(async { Ok(Value::Str("ok".into())) }));
        encode_session(&schema, &value, None, client, &SessionOptions::default()).await.unwrap();
    });

    let (_schema, decoded) = decode_session(None, server, &SessionOptions::default()).await.unwrap();
    let ctx = DecodeCtx::new(8);
    match decoded {
        Decoded::Promise(handle) => {
            let resolved = handle.resolve(&ctx).await.unwrap();
            match resolved {
                Decoded::Str(s) => assert_eq!(s, "ok"),
                other => panic!("expected Decoded::Str, got {other:?}"),
            }
        }
        other => panic!("expected Decoded::Promise, got {other:?}"),
    }
    send.await.unwrap();
}

#[tokio::test]
async fn promise_rejects_with_serializable_error() {
    init_tracing();
    let (client, server) = tokio::io::duplex(4096);

    let send = tokio::spawn(async move {
        let schema = Schema::promise(Schema::Str);
        let value = Value::Promise(PromiseProducer::new(async {
            Err(Error::serializable(Schema::Str, Value::Str("bad".into())))
        }));
        encode_session(&schema, &value, None, client, &SessionOptions::default()).await.unwrap();
    });

    let (_schema, decoded) = decode_session(None, server, &SessionOptions::default()).await.unwrap();
    let ctx = DecodeCtx::new(8);
    match decoded {
        Decoded::Promise(handle) => {
            let err = handle.resolve(&ctx).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Serializable);
            let received = err.as_received_serializable().expect("expected a received-serializable payload");
            match &received.data {
                Decoded::Str(s) => assert_eq!(s, "bad"),
                other => panic!("expected Decoded::Str(\"bad\"), got {other:?}"),
            }
        }
        other => panic!("expected Decoded::Promise, got {other:?}"),
    }
    send.await.unwrap();
}

struct CountUp {
    next: u64,
    max: u64,
}

impl IteratorProducer for CountUp {
    fn next(&mut self) -> BoxFuture<ProducerResult<Option<Value>>> {
        let item = if self.next <= self.max {
            let v = self.next;
            self.next += 1;
            Some(Value::Uint(v))
        } else {
            None
        };
        Box::pin(async move { Ok(item) })
    }
}

#[tokio::test]
async fn iterator_yields_items_then_ends() {
    init_tracing();
    let (client, server) = tokio::io::duplex(4096);

    let send = tokio::spawn(async move {
        let schema = Schema::iterator(Schema::Uint);
        let value = Value::Iterator(IteratorHandle::new(Box::new(CountUp { next: 1, max: 3 })));
        encode_session(&schema, &value, None, client, &SessionOptions::default()).await.unwrap();
    });

    let (_schema, decoded) = decode_session(None, server, &SessionOptions::default()).await.unwrap();
    let ctx = DecodeCtx::new(8);
    match decoded {
        Decoded::Iterator(mut consumer) => {
            let mut items = Vec::new();
            while let Some(item) = consumer.next(&ctx).await.unwrap() {
                match item {
                    Decoded::Uint(v) => items.push(v),
                    other => panic!("expected Decoded::Uint, got {other:?}"),
                }
            }
            assert_eq!(items, vec![1, 2, 3]);
        }
        other => panic!("expected Decoded::Iterator, got {other:?}"),
    }
    send.await.unwrap();
}

struct TwoChunks {
    chunks: Vec<&'static [u8]>,
}

impl ByteStreamProducer for TwoChunks {
    fn next(&mut self) -> BoxFuture<ProducerResult<Option<Bytes>>> {
        let chunk = if self.chunks.is_empty() { None } else { Some(Bytes::from_static(self.chunks.remove(0))) };
        Box::pin(async move { Ok(chunk) })
    }
}

#[tokio::test]
async fn readable_stream_yields_chunks_then_ends() {
    init_tracing();
    let (client, server) = tokio::io::duplex(4096);

    let send = tokio::spawn(async move {
        let schema = Schema::ReadableStream;
        let value = Value::ReadableStream(ReadableStreamHandle::new(Box::new(TwoChunks { chunks: vec![b"ab", b"cde"] })));
        encode_session(&schema, &value, None, client, &SessionOptions::default()).await.unwrap();
    });

    let (_schema, decoded) = decode_session(None, server, &SessionOptions::default()).await.unwrap();
    match decoded {
        Decoded::ReadableStream(mut consumer) => {
            let mut chunks = Vec::new();
            while let Some(chunk) = consumer.next().await.unwrap() {
                chunks.push(chunk);
            }
            assert_eq!(chunks, vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cde")]);
        }
        other => panic!("expected Decoded::ReadableStream, got {other:?}"),
    }
    send.await.unwrap();
}

struct Forever(AtomicU64);

impl IteratorProducer for Forever {
    fn next(&mut self) -> BoxFuture<ProducerResult<Option<Value>>> {
        let v = self.0.fetch_add(1, Ordering::Relaxed);
        Box::pin(async move { Ok(Some(Value::Uint(v))) })
    }
}

/// Dropping a consumer handle before its producer ever ends must not hang
/// the decode side: the dispatcher deregisters and silently discards any
/// further frames on that channel (§4.7 "slurp release", decode-side half).
#[tokio::test]
async fn dropping_iterator_consumer_does_not_hang_decode_side() {
    init_tracing();
    let (client, server) = tokio::io::duplex(4096);

    let send = tokio::spawn(async move {
        let schema = Schema::iterator(Schema::Uint);
        let value = Value::Iterator(IteratorHandle::new(Box::new(Forever(AtomicU64::new(0)))));
        encode_session(&schema, &value, None, client, &SessionOptions::default()).await.unwrap();
    });

    let (_schema, decoded) = decode_session(None, server, &SessionOptions::default()).await.unwrap();
    let ctx = DecodeCtx::new(8);
    match decoded {
        Decoded::Iterator(mut consumer) => {
            let first = consumer.next(&ctx).await.unwrap();
            assert!(matches!(first, Some(Decoded::Uint(0))));
            drop(consumer);
        }
        other => panic!("expected Decoded::Iterator, got {other:?}"),
    }

    // The encode side never stops (the producer is infinite), so its task
    // is abandoned rather than awaited; only the decode side's prompt
    // teardown is under test here.
    tokio::time::sleep(Duration::from_millis(20)).await;
    send.abort();
}
