use bigdecimal::BigDecimal;
use chrono::DateTime;
use std::str::FromStr;

use quartzdb::value::{
    decode_bytes_value, decode_decimal_value, decode_float_value, decode_int_value,
    encode_bytes_value, encode_decimal_value, encode_float_value, encode_int_value,
    peek_value_length, sort_key_values,
};
use quartzdb::{
    Duration, InternalTimeSeriesData, InternalTimeSeriesSample, Key, KeyValue, Timestamp, Value,
    ValueError, ValueTag,
};

#[test]
fn encoded_int_scenario() {
    let encoded = encode_int_value(Vec::new(), 42);
    // Tag byte followed by the zig-zag varint: 42 encodes as a single byte.
    assert_eq!(encoded, vec![ValueTag::Int as u8, 84]);
    assert_eq!(peek_value_length(&encoded).unwrap(), 2);

    let (rest, decoded) = decode_int_value(&encoded).unwrap();
    assert!(rest.is_empty());
    assert_eq!(decoded, 42);
}

#[test]
fn sequential_values_decode_from_one_buffer() {
    let b = encode_int_value(Vec::new(), -7);
    let b = encode_float_value(b, 2.5);
    let b = encode_bytes_value(b, b"tail", true);

    let (b, i) = decode_int_value(&b).unwrap();
    assert_eq!(i, -7);
    let (b, f) = decode_float_value(b).unwrap();
    assert_eq!(f, 2.5);
    let (b, data) = decode_bytes_value(b).unwrap();
    assert_eq!(data, b"tail");
    assert!(b.is_empty());
}

#[test]
fn non_delimited_bytes_consume_the_remainder() {
    let encoded = encode_bytes_value(Vec::new(), b"payload \x00 with zeros", false);
    let (rest, data) = decode_bytes_value(&encoded).unwrap();
    assert!(rest.is_empty());
    assert_eq!(data, b"payload \x00 with zeros");
}

#[test]
fn delimited_decimal_round_trips_with_tail() {
    let d = BigDecimal::from_str("-1234.000567").unwrap();
    let mut encoded = encode_decimal_value(Vec::new(), &d, true);
    encoded.extend_from_slice(b"rest");

    assert_eq!(peek_value_length(&encoded).unwrap(), encoded.len() - 4);
    let (rest, decoded) = decode_decimal_value(&encoded).unwrap();
    assert_eq!(rest, b"rest");
    assert_eq!(decoded, d);
}

#[test]
fn typed_accessors_round_trip() {
    let mut v = Value::default();

    v.set_int(-99);
    assert_eq!(v.tag(), ValueTag::Int);
    assert_eq!(v.get_int().unwrap(), -99);

    v.set_float(3.25);
    assert_eq!(v.tag(), ValueTag::Float);
    assert_eq!(v.get_float().unwrap(), 3.25);

    v.set_string("hello");
    assert_eq!(v.tag(), ValueTag::Bytes);
    assert_eq!(v.get_bytes().unwrap(), b"hello");

    let t = DateTime::from_timestamp(1_700_000_000, 42).unwrap();
    v.set_time(t);
    assert_eq!(v.tag(), ValueTag::Time);
    assert_eq!(v.get_time().unwrap(), t);

    let d = Duration::new(2, 3, 500);
    v.set_duration(d).unwrap();
    assert_eq!(v.tag(), ValueTag::Duration);
    assert_eq!(v.get_duration().unwrap(), d);

    let dec = BigDecimal::from_str("0.00000000001").unwrap();
    v.set_decimal(&dec);
    assert_eq!(v.tag(), ValueTag::Decimal);
    assert_eq!(v.get_decimal().unwrap(), dec);
}

#[test]
fn typed_accessors_reject_mismatched_tags() {
    let mut v = Value::default();
    v.set_int(5);
    assert!(matches!(
        v.get_float(),
        Err(ValueError::TagMismatch {
            expected: ValueTag::Float,
            actual: ValueTag::Int,
        })
    ));
    assert!(matches!(
        v.get_bytes(),
        Err(ValueError::TagMismatch {
            expected: ValueTag::Bytes,
            actual: ValueTag::Int,
        })
    ));
}

#[test]
fn proto_values_are_tagged_bytes() {
    #[derive(Clone, PartialEq, ::prost::Message)]
    struct Probe {
        #[prost(string, tag = "1")]
        name: String,
        #[prost(int64, tag = "2")]
        count: i64,
    }

    let msg = Probe {
        name: "probe".to_owned(),
        count: 7,
    };
    let mut v = Value::default();
    v.set_proto(&msg);
    assert_eq!(v.tag(), ValueTag::Bytes);
    assert_eq!(v.get_proto::<Probe>().unwrap(), msg);
}

#[test]
fn timeseries_values_decode_only_via_their_accessor() {
    let batch = InternalTimeSeriesData {
        start_timestamp_nanos: 1_000,
        sample_duration_nanos: 100,
        samples: vec![InternalTimeSeriesSample {
            offset: 3,
            count: 2,
            sum: 5.5,
            max: Some(4.0),
            min: Some(1.5),
        }],
    };

    let mut v = Value::default();
    v.set_proto(&batch);
    assert_eq!(v.tag(), ValueTag::Timeseries);
    assert_eq!(v.get_timeseries().unwrap(), batch);
    // The bytes accessor must refuse the distinguished tag.
    assert!(v.get_bytes().is_err());
}

#[test]
fn peek_lengths_by_tag() {
    assert_eq!(peek_value_length(&[ValueTag::Null as u8]).unwrap(), 1);

    let float = encode_float_value(Vec::new(), f64::MAX);
    assert_eq!(peek_value_length(&float).unwrap(), 9);

    let bytes = encode_bytes_value(Vec::new(), &[7u8; 300], true);
    assert_eq!(peek_value_length(&bytes).unwrap(), bytes.len());

    let mut v = Value::default();
    v.set_time(DateTime::from_timestamp(1_700_000_000, 999_999_999).unwrap());
    let tagged = &v.raw_bytes[4..];
    assert_eq!(peek_value_length(tagged).unwrap(), tagged.len());

    v.set_duration(Duration::new(-2, 40, 17)).unwrap();
    let tagged = &v.raw_bytes[4..];
    assert_eq!(peek_value_length(tagged).unwrap(), tagged.len());
}

#[test]
fn peek_rejects_non_self_delimiting_and_unknown_tags() {
    let bytes = encode_bytes_value(Vec::new(), b"x", false);
    assert!(matches!(
        peek_value_length(&bytes),
        Err(ValueError::NotSelfDelimiting(ValueTag::Bytes))
    ));

    let decimal = encode_decimal_value(Vec::new(), &BigDecimal::from_str("1").unwrap(), false);
    assert!(matches!(
        peek_value_length(&decimal),
        Err(ValueError::NotSelfDelimiting(ValueTag::Decimal))
    ));

    assert!(matches!(
        peek_value_length(&[42, 1, 2]),
        Err(ValueError::UnknownTag(42))
    ));
    assert!(matches!(peek_value_length(&[]), Err(ValueError::Empty)));
}

#[test]
fn checksum_verifies_and_detects_corruption() {
    let mut v = Value::from_string("payload");
    assert_eq!(v.checksum(), 0);
    v.init_checksum(b"the-key");
    assert_ne!(v.checksum(), 0);
    v.verify(b"the-key").unwrap();

    // A different key produces a different sum.
    let err = v.verify(b"other-key").unwrap_err();
    assert!(matches!(err, ValueError::ChecksumMismatch { .. }));

    // Mutating the payload after init breaks verification.
    let last = v.raw_bytes.len() - 1;
    v.raw_bytes[last] ^= 0xff;
    assert!(v.verify(b"the-key").is_err());
}

#[test]
fn verify_is_a_noop_without_a_checksum() {
    let mut v = Value::from_string("payload");
    let last = v.raw_bytes.len() - 1;
    v.raw_bytes[last] ^= 0xff;
    v.verify(b"any-key").unwrap();
}

#[test]
fn verify_rejects_truncated_headers() {
    let v = Value {
        raw_bytes: vec![0, 0, 0, 1],
        timestamp: Timestamp::ZERO,
    };
    assert!(matches!(
        v.verify(b"k"),
        Err(ValueError::InvalidHeaderSize { size: 4, .. })
    ));
}

#[test]
fn empty_value_is_a_tombstone() {
    let v = Value::default();
    assert!(v.raw_bytes.is_empty());
    assert_eq!(v.tag(), ValueTag::Unknown);
    assert_eq!(v.checksum(), 0);
    v.verify(b"k").unwrap();
}

#[test]
fn setters_clear_a_previous_checksum() {
    let mut v = Value::from_string("first");
    v.init_checksum(b"k");
    assert_ne!(v.checksum(), 0);
    v.set_int(5);
    assert_eq!(v.checksum(), 0);
    // A fresh init must therefore not panic.
    v.init_checksum(b"k");
    v.verify(b"k").unwrap();
}

#[test]
fn values_carry_their_mvcc_timestamp() {
    let v = Value::from_bytes_and_timestamp(b"versioned", Timestamp::new(77, 3));
    assert_eq!(v.timestamp, Timestamp::new(77, 3));
    assert_eq!(v.get_bytes().unwrap(), b"versioned");
}

#[test]
fn key_values_sort_by_key() {
    let mut kvs = vec![
        KeyValue {
            key: Key::from("b"),
            value: Value::from_string("2"),
        },
        KeyValue {
            key: Key::from("a\x00"),
            value: Value::from_string("1"),
        },
        KeyValue {
            key: Key::from("a"),
            value: Value::from_string("0"),
        },
    ];
    sort_key_values(&mut kvs);
    let keys: Vec<Key> = kvs.iter().map(|kv| kv.key.clone()).collect();
    assert_eq!(
        keys,
        vec![Key::from("a"), Key::from("a\x00"), Key::from("b")]
    );
}

#[test]
fn values_survive_serde() {
    let mut v = Value::from_bytes_and_timestamp(b"wire", Timestamp::new(9, 1));
    v.init_checksum(b"k");
    let json = serde_json::to_string(&v).unwrap();
    let back: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(back, v);
    back.verify(b"k").unwrap();
}
