use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use fdiag_core::log::{self, buffer};
use fdiag_core::ErrorLevel;

fn bench_format_line(c: &mut Criterion) {
    for len in [32usize, 300, 4096] {
        let body = "x".repeat(len);
        c.bench_with_input(BenchmarkId::new("format_line", len), &body, |b, body| {
            let mut stack = [0u8; 384];
            b.iter(|| {
                buffer::format_line(
                    &mut stack,
                    format_args!("[{:.3}] <{:x}:{}> ", 1.5f64, 0x1f, 3),
                    format_args!("{}", body),
                    usize::MAX,
                    |line| black_box(line.len()),
                )
            });
        });
    }
}

fn bench_emit(c: &mut Criterion) {
    // Callback only, so the numbers do not include terminal writes.
    log::set_stdout_enabled(false);
    log::set_callback(Some(Arc::new(|_level: ErrorLevel, line: &str| {
        black_box(line);
    })));

    c.bench_function("emit_short", |b| {
        b.iter(|| log::emit(ErrorLevel::Info, "", format_args!("worker {} ready", black_box(7)), None));
    });

    let long = "y".repeat(2048);
    c.bench_function("emit_grown", |b| {
        b.iter(|| log::emit(ErrorLevel::Info, "", format_args!("{}", black_box(&long)), None));
    });

    log::set_callback(None);
    log::set_stdout_enabled(true);
}

criterion_group!(benches, bench_format_line, bench_emit);
criterion_main!(benches);
