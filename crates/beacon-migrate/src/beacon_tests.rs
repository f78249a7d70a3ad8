//! Tests for beacon record encodings.

use super::*;

#[test]
fn test_decode_legacy_record() {
    let value = br#"{"PreviousSig":"0102","Round":42,"Signature":"aabbcc"}"#;

    let record = BeaconRecord::decode_legacy(value).unwrap();

    assert_eq!(record.round, 42);
    assert_eq!(record.signature, vec![0xAA, 0xBB, 0xCC]);
    assert_eq!(record.previous_signature, vec![0x01, 0x02]);
}

#[test]
fn test_decode_legacy_without_previous_signature() {
    let value = br#"{"Round":1,"Signature":"ff"}"#;

    let record = BeaconRecord::decode_legacy(value).unwrap();

    assert_eq!(record.round, 1);
    assert!(record.previous_signature.is_empty());
}

#[test]
fn test_decode_legacy_accepts_lowercase_fields() {
    let value = br#"{"previous_sig":null,"round":7,"signature":"0a0b"}"#;

    let record = BeaconRecord::decode_legacy(value).unwrap();

    assert_eq!(record.round, 7);
    assert_eq!(record.signature, vec![0x0A, 0x0B]);
    assert!(record.previous_signature.is_empty());
}

#[test]
fn test_decode_falls_back_to_raw_pair() {
    let key = 5u64.to_be_bytes();
    let value = [0xAA, 0xBB, 0xCC];

    let record = BeaconRecord::decode(&key, &value).unwrap();

    assert_eq!(
        record,
        BeaconRecord {
            previous_signature: Vec::new(),
            round: 5,
            signature: vec![0xAA, 0xBB, 0xCC],
        }
    );
}

#[test]
fn test_decode_rejects_short_key_on_fallback() {
    let result = BeaconRecord::decode(&[0, 1, 2], &[0xAA]);

    assert!(matches!(result, Err(Error::SourceIo(_))));
}

#[test]
fn test_encode_legacy_is_decodable() {
    let mut record = BeaconRecord::new(9, vec![1, 2, 3]);
    record.previous_signature = vec![4, 5];

    let encoded = record.encode_legacy().unwrap();
    let text = String::from_utf8(encoded.clone()).unwrap();

    assert!(text.contains("\"Signature\":\"010203\""));
    assert_eq!(BeaconRecord::decode_legacy(&encoded).unwrap(), record);
}

#[test]
fn test_round_keys_sort_numerically() {
    let mut keys = vec![round_key(256), round_key(1), round_key(255)];
    keys.sort();

    let rounds: Vec<u64> = keys.iter().map(|k| round_from_key(k).unwrap()).collect();
    assert_eq!(rounds, vec![1, 255, 256]);
}

#[test]
fn test_raw_signature_is_not_legacy() {
    assert!(BeaconRecord::decode_legacy(&[0x8f, 0x01, 0x00, 0x7b]).is_err());
}
