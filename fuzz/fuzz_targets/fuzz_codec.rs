// Copyright 2026 BadCompany
// Licensed under the Apache License, Version 2.0

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;
use uniproxy::mcp::codec::McpCodec;

fuzz_target!(|data: &[u8]| {
    // Backend stdout is untrusted: no byte sequence may panic the decoder.
    let mut codec = McpCodec::with_max_frame(4096);
    let mut buffer = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buffer) {}
    let _ = codec.decode_eof(&mut buffer);
});
