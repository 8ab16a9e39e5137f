use super::*;

#[test]
fn node_insert_roundtrips() {
    let mut props = [0u8; N_PROPS];
    props[0] = 0xAB;
    let frame = Frame::NodeInsert {
        id: 42,
        kind: 7,
        props,
    };
    let encoded = frame.encode();
    assert_eq!(encoded.len(), NODE_FRAME_SIZE);
    assert_eq!(Frame::decode(&encoded).unwrap(), frame);
}

#[test]
fn edge_insert_roundtrips() {
    let mut props = [0u8; N_EPROPS];
    props[63] = 0xFF;
    let frame = Frame::EdgeInsert {
        from: 1,
        to: 2,
        label: 99,
        props,
    };
    let encoded = frame.encode();
    assert_eq!(encoded.len(), EDGE_FRAME_SIZE);
    assert_eq!(Frame::decode(&encoded).unwrap(), frame);
}

#[test]
fn corrupted_payload_fails_crc() {
    let frame = Frame::NodeInsert {
        id: 1,
        kind: 1,
        props: [0u8; N_PROPS],
    };
    let mut encoded = frame.encode();
    encoded[5] ^= 0xFF;
    let err = Frame::decode(&encoded).unwrap_err();
    assert!(matches!(err, Error::Corrupt(_)));
}

#[test]
fn unknown_tag_is_corrupt() {
    let mut encoded = vec![0xEEu8; NODE_FRAME_SIZE];
    let err = Frame::decode(&mut encoded).unwrap_err();
    assert!(matches!(err, Error::Corrupt(_)));
}

#[test]
fn wrong_length_is_corrupt() {
    let encoded = vec![TAG_NODE_INSERT_FOR_TEST; NODE_FRAME_SIZE - 1];
    let err = Frame::decode(&encoded).unwrap_err();
    assert!(matches!(err, Error::Corrupt(_)));
}

const TAG_NODE_INSERT_FOR_TEST: u8 = 0x01;

#[test]
fn header_roundtrips() {
    let header = encode_header();
    assert!(validate_header(&header).is_ok());
}

#[test]
fn header_rejects_bad_magic() {
    let mut header = encode_header();
    header[0] ^= 0xFF;
    assert!(validate_header(&header).is_err());
}

#[test]
fn crc32_matches_known_vector() {
    // "123456789" -> 0xCBF43926 is the standard CRC-32/ISO-HDLC check value.
    assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
}
