use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use meta_session::io_buffer::IoBuffer;
use meta_session::rpc::{Framer, LineFramer};

const LINE: &[u8] = b"3 PUT /a/b/c/d/e/f/g/h 1234567890\n";

fn compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("io_buffer_compact");
    for live_bytes in [64usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(live_bytes as u64));
        group.bench_with_input(
            BenchmarkId::new("compact", live_bytes),
            black_box(&live_bytes),
            |b, &live_bytes| {
                b.iter_batched(
                    || {
                        let mut buf = IoBuffer::new(64);
                        let filler = vec![0u8; live_bytes * 4];
                        std::io::Write::write_all(&mut buf, &filler).unwrap();
                        buf.consume(live_bytes * 3);
                        buf
                    },
                    |mut buf| buf.compact(usize::MAX),
                    criterion::BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

fn framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_framing");
    for lines in [1usize, 16, 256] {
        let mut input = Vec::with_capacity(LINE.len() * lines);
        for _ in 0..lines {
            input.extend_from_slice(LINE);
        }
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::new("is_message_available", lines), &input, |b, input| {
            b.iter(|| LineFramer.is_message_available(black_box(input)))
        });
    }
    group.finish();
}

criterion_group!(benches, compaction, framing);
criterion_main!(benches);
