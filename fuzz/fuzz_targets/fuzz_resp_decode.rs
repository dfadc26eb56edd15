#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use ferrite_rs::codec::encode_value;
use ferrite_rs::RespCodec;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes returns a frame, a need-more, or an error. Never a panic.
    let mut codec = RespCodec::with_max_bulk_len(1 << 20);
    let mut buf = BytesMut::from(data);
    let Ok(Some(value)) = codec.decode(&mut buf) else {
        return;
    };

    // A decoded frame re-encodes to bytes that decode to the same frame.
    let mut encoded = BytesMut::new();
    encode_value(&value, &mut encoded);
    let reparsed = codec.decode(&mut encoded);
    assert_eq!(reparsed.ok().flatten(), Some(value), "re-encode mismatch");
    assert!(encoded.is_empty());
});
