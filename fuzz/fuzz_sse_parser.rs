//! Fuzz target for the client-side event stream decoder.
//!
//! Run with: cargo +nightly fuzz run fuzz_sse_parser
//!
//! Feeds arbitrary bytes in arbitrary chunk sizes; the decoder must never
//! panic and must yield the same events regardless of chunking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wgpilot_core::ipc::client::SseParser;

fn drain(parser: &mut SseParser) -> usize {
    let mut n = 0;
    while parser.pop().is_some() {
        n += 1;
    }
    n
}

fuzz_target!(|data: &[u8]| {
    let Some((&step, body)) = data.split_first() else {
        return;
    };

    let mut whole = SseParser::default();
    whole.push(body);
    let expected = drain(&mut whole);

    let mut chunked = SseParser::default();
    let mut got = 0;
    for chunk in body.chunks(usize::from(step).max(1)) {
        chunked.push(chunk);
        got += drain(&mut chunked);
    }
    assert_eq!(got, expected);
});
