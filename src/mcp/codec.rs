// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! MCP stdio framing codec.
//!
//! One JSON-RPC message per line. Blank lines are skipped; lines that are not
//! JSON are surfaced as [`Frame::Noise`] so a chatty backend that prints to
//! stdout does not poison the pipe. A line longer than the frame limit is fatal.

use crate::gateway_core::constants::limits;
use anyhow::{anyhow, Result};
use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Value),
    /// A non-JSON line from the backend.
    Noise(String),
}

pub struct McpCodec {
    /// Bytes already scanned for a newline, so partial reads are not rescanned.
    scanned: usize,
    max_frame: usize,
}

impl McpCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame(limits::MAX_MESSAGE_SIZE_BYTES)
    }

    #[must_use]
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            scanned: 0,
            max_frame,
        }
    }
}

impl Default for McpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for McpCodec {
    type Item = Frame;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let newline = src[self.scanned..].iter().position(|b| *b == b'\n');
            let Some(offset) = newline else {
                self.scanned = src.len();
                if src.len() > self.max_frame {
                    return Err(anyhow!(
                        "Frame of at least {} bytes exceeds max limit {}",
                        src.len(),
                        self.max_frame
                    ));
                }
                return Ok(None);
            };

            let end = self.scanned + offset;
            self.scanned = 0;
            if end > self.max_frame {
                return Err(anyhow!("Frame length {} exceeds max limit", end));
            }
            let line = src.split_to(end + 1);
            let body = trim_line(&line[..end]);
            if body.is_empty() {
                continue;
            }

            trace!("Decoder read {} byte frame", body.len());
            return Ok(Some(match serde_json::from_slice::<Value>(body) {
                Ok(val) => Frame::Message(val),
                Err(_) => Frame::Noise(String::from_utf8_lossy(body).into_owned()),
            }));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // Trailing frame without newline before the pipe closed.
        self.scanned = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        let body = trim_line(&rest);
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(match serde_json::from_slice::<Value>(body) {
            Ok(val) => Frame::Message(val),
            Err(_) => Frame::Noise(String::from_utf8_lossy(body).into_owned()),
        }))
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    let mut start = 0;
    while start < end && matches!(line[start], b' ' | b'\t') {
        start += 1;
    }
    &line[start..end]
}

impl<'a> Encoder<&'a Value> for McpCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: &'a Value, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(item)?;
        dst.reserve(body.len() + 1);
        dst.put_slice(&body);
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl Encoder<Value> for McpCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&Value>>::encode(self, &item, dst)
    }
}
