#![no_main]

use bytes::Bytes;
use ferrite_wire::codec::{decode, decode_message, FrameDecoder};
use ferrite_wire::command::Command;
use libfuzzer_sys::fuzz_target;

const MAX_FRAME: usize = 1 << 16;

fuzz_target!(|data: &[u8]| {
    let bytes = Bytes::copy_from_slice(data);

    // One-shot decoders must never panic.
    let _ = decode(&bytes, MAX_FRAME);
    let _ = decode_message(&bytes, MAX_FRAME);

    // Streaming in two halves must agree with the one-shot decode.
    let mid = data.len() / 2;
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    decoder.feed(&data[..mid]);
    let mut streamed = Vec::new();
    while let Ok(Some(frame)) = decoder.next_frame() {
        streamed.push(frame);
    }
    decoder.feed(&data[mid..]);
    loop {
        match decoder.next_frame() {
            Ok(Some(frame)) => streamed.push(frame),
            Ok(None) | Err(_) => break,
        }
    }
    if let Ok((frames, _)) = decode(&bytes, MAX_FRAME) {
        assert_eq!(frames, streamed);
    }

    for frame in streamed.iter().filter(|f| f.is_command()) {
        let _ = Command::parse(&frame.payload);
    }
});
