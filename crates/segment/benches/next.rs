use criterion::{criterion_group, criterion_main, Criterion};
use rabbitid_segment::{Segment, SegmentError};

const STEP: i64 = 10_000;

fn bench_next(c: &mut Criterion) {
    let seg = Segment::new(0, "bench", "next", STEP);
    let mut min = 0i64;
    seg.expand(min, STEP).unwrap();
    min += STEP;

    c.bench_function("segment_next", |b| {
        b.iter(|| loop {
            match seg.next() {
                Ok(id) => break id,
                Err(SegmentError::Empty) => {
                    // Refill inline; the ring keeps at most one spare here.
                    seg.expand(min, STEP).unwrap();
                    min += STEP;
                }
                Err(e) => panic!("bench expand failed: {e}"),
            }
        });
    });
}

fn bench_expand(c: &mut Criterion) {
    c.bench_function("segment_expand_drain", |b| {
        b.iter_batched(
            || {
                let seg = Segment::new(0, "bench", "expand", 2);
                seg
            },
            |seg| {
                for i in 0..32 {
                    seg.expand(i * 2, 2).unwrap();
                    seg.next().unwrap();
                    seg.next().unwrap();
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_next, bench_expand);
criterion_main!(benches);
