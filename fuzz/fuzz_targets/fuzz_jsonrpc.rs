// Copyright 2026 BadCompany
// Licensed under the Apache License, Version 2.0

#![no_main]

use libfuzzer_sys::fuzz_target;
use uniproxy::protocol::handler::{IncomingMessage, ProtocolHandler};

fuzz_target!(|data: &[u8]| {
    // POST bodies are untrusted: classification returns a value or an error, never panics.
    if let Ok(message) = ProtocolHandler::classify(data) {
        let _ = message.reply_id();
        if let IncomingMessage::Request(request) = &message {
            if message.is_initialize() {
                let _ = ProtocolHandler::validate_initialize(request);
            }
        }
    }
});
