//! Decode throughput and latency benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use feed_bridge::record::RecordMessage;
use feed_bridge::{RecordDecoder, SymbolMappingMsg, SystemMsg, TradeMsg};

fn create_record_buffer(record_count: usize) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(record_count * TradeMsg::SIZE);

    for i in 0..record_count {
        let trade = TradeMsg::new((i % 64) as u32, i as u64, 4_512_250_000_000, 1);
        buffer.extend_from_slice(&trade.encode());
    }

    buffer
}

fn bench_decode_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_throughput");

    for record_count in [1000, 10000, 100000].iter() {
        let buffer = black_box(create_record_buffer(*record_count));

        group.bench_with_input(
            BenchmarkId::from_parameter(record_count),
            record_count,
            |b, _| {
                b.iter(|| RecordDecoder::decode_stream(&buffer, |_| true));
            },
        );
    }
    group.finish();
}

fn bench_decode_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_latency");

    let trade = TradeMsg::new(42, 0, 4_512_250_000_000, 1).encode();

    group.bench_function("header_only", |b| {
        b.iter(|| RecordDecoder::decode(black_box(&trade)))
    });

    group.bench_function("typed_trade", |b| {
        b.iter(|| {
            let (record, _) = RecordDecoder::decode(black_box(&trade)).ok()?;
            record.get::<TradeMsg>().ok()
        })
    });

    group.finish();
}

fn bench_decode_record_types(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_types");

    let mapping = SymbolMappingMsg::new(100, 0, "ES.FUT", "ESZ4").encode();
    let heartbeat = SystemMsg::heartbeat(0).encode();

    group.bench_function("symbol_mapping", |b| {
        b.iter(|| {
            let (record, _) = RecordDecoder::decode(black_box(&mapping)).ok()?;
            record.get::<SymbolMappingMsg>().ok()
        })
    });

    group.bench_function("system", |b| {
        b.iter(|| {
            let (record, _) = RecordDecoder::decode(black_box(&heartbeat)).ok()?;
            record.get::<SystemMsg>().ok().map(|m| m.is_heartbeat())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode_throughput,
    bench_decode_latency,
    bench_decode_record_types
);
criterion_main!(benches);
