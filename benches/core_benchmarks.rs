use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use tokio_util::codec::Decoder;
use uniproxy::mcp::codec::McpCodec;
use uniproxy::protocol::handler::ProtocolHandler;
use uniproxy::state::response_cache::fingerprint;

fn bench_codec_decode(c: &mut Criterion) {
    let mut codec = McpCodec::new();
    let data = b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n";

    c.bench_function("codec_decode_ping", |b| {
        b.iter(|| {
            let mut src = BytesMut::from(&data[..]);
            let _ = codec.decode(black_box(&mut src));
        })
    });
}

fn bench_fingerprint(c: &mut Criterion) {
    let params = json!({
        "uri": "file:///var/data/report.csv",
        "cursor": "abc123",
        "filter": {"tags": ["a", "b", "c"], "limit": 50},
        "_meta": {"progressToken": 9}
    });

    c.bench_function("fingerprint_resources_read", |b| {
        b.iter(|| fingerprint(black_box("resources/read"), Some(black_box(&params))))
    });
}

fn bench_classify(c: &mut Criterion) {
    let body = br#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"echo","arguments":{"text":"hi"}}}"#;

    c.bench_function("classify_tools_call", |b| {
        b.iter(|| ProtocolHandler::classify(black_box(body)))
    });
}

criterion_group!(benches, bench_codec_decode, bench_fingerprint, bench_classify);
criterion_main!(benches);
