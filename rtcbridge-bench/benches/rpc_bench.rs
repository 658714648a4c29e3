//! RPC envelope and dispatch benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rtcbridge_rpc::envelope::Envelope;
use rtcbridge_rpc::{pipe, MethodTable, ReturnValue, RpcConfig, RpcEndpoint, RpcRequest};
use serde_json::json;

fn create_test_request(payload_size: usize) -> String {
    let request = RpcRequest::new("prepareToReceive")
        .with_id("42")
        .with_ref_id("7")
        .with_params(vec![
            json!({
                "mediaDescriptions": [{
                    "type": "audio",
                    "payloads": [{"type": 111, "encodingName": "OPUS", "clockRate": 48000}],
                    "ice": {"ufrag": "x".repeat(payload_size)},
                }],
            }),
            json!(true),
        ]);
    serde_json::to_string(&request).unwrap()
}

fn bench_envelope_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_parse");

    for size in [16, 1000, 10000] {
        let text = create_test_request(size);

        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &text, |b, text| {
            b.iter(|| black_box(Envelope::parse(text).unwrap()));
        });
    }

    let response = json!({"id": "42", "result": {"ok": true}, "resultType": "object"}).to_string();
    group.bench_function("response", |b| {
        b.iter(|| black_box(Envelope::parse(&response).unwrap()));
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    let (local, mut remote) = pipe();
    let endpoint = RpcEndpoint::new(local.link.clone(), RpcConfig::restricted());
    endpoint.set_scope(MethodTable::new().with("echo", |call| {
        Ok(ReturnValue::Value(call.param(0).cloned().unwrap_or_default()))
    }));
    endpoint.export_functions(&["echo"]);

    let request = serde_json::to_string(
        &RpcRequest::new("echo")
            .with_id("1")
            .with_params(vec![json!({"candidate": "candidate:1 1 UDP 2130706431 10.0.0.1 6000 typ host"})]),
    )
    .unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("exported_call", |b| {
        b.iter(|| {
            endpoint.handle_message(&request).unwrap();
            black_box(remote.incoming.try_recv().unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_envelope_parse, bench_dispatch);
criterion_main!(benches);
