use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use umfsp_core::testing::{populated_memfs, sorted_names};
use umfsp_core::{
    AdaptiveLock, DirBuffer, DirEntry, DispatchConfig, DispatchCore, FileInfo, LockTable,
    OpenOptions, Operation, ProxyResult, Request, RequestToken, ResponsePayload,
};

fn entries(n: usize) -> Vec<DirEntry> {
    sorted_names("entry-", n)
        .into_iter()
        .map(|name| DirEntry::new(name, FileInfo::default()))
        .collect()
}

fn filled_buffer(entries: &[DirEntry]) -> DirBuffer {
    let mut buf = DirBuffer::new(1, usize::MAX);
    buf.ensure_filled(|pos| -> ProxyResult<Option<DirEntry>> {
        Ok(entries.get(usize::try_from(pos).unwrap_or(usize::MAX)).cloned())
    })
    .unwrap();
    buf
}

/// Uncontended fast path versus a lock bouncing between two threads.
fn bench_adaptive_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("adaptive_lock");
    group.measurement_time(Duration::from_secs(5));

    let lock = Arc::new(AdaptiveLock::new());
    group.bench_function("uncontended", |b| {
        b.iter(|| {
            let guard = lock.acquire(1, 0, Duration::from_secs(1)).unwrap();
            black_box(&guard);
        });
    });

    let table = LockTable::new();
    group.bench_function("table_lookup_and_acquire", |b| {
        let mut offset = 0u64;
        b.iter(|| {
            offset = (offset + 1) % 64;
            let guard = table.acquire(1, black_box(offset), Duration::from_secs(1)).unwrap();
            black_box(&guard);
        });
    });

    group.bench_function("two_threads", |b| {
        b.iter_custom(|iters| {
            let lock = Arc::new(AdaptiveLock::new());
            let other = {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..iters {
                        drop(lock.acquire(1, 0, Duration::from_secs(10)).unwrap());
                    }
                })
            };
            let start = std::time::Instant::now();
            for _ in 0..iters {
                drop(lock.acquire(1, 0, Duration::from_secs(10)).unwrap());
            }
            let elapsed = start.elapsed();
            other.join().unwrap();
            elapsed
        });
    });

    group.finish();
}

/// Fill cost and copy-out cost for a range of directory sizes.
fn bench_dir_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("dir_buffer");

    for n in [16usize, 256, 4096] {
        let source = entries(n);
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("fill", n), &source, |b, source| {
            b.iter(|| black_box(filled_buffer(source)));
        });

        group.bench_with_input(BenchmarkId::new("drain_4k", n), &source, |b, source| {
            b.iter_batched(
                || filled_buffer(source),
                |mut buf| {
                    let mut dest = Vec::with_capacity(4096);
                    while buf.copy_out(&mut dest, 4096).is_ok() {
                        dest.clear();
                    }
                    buf
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Full query-directory path through the dispatcher core.
fn bench_query_directory(c: &mut Criterion) {
    let fs = populated_memfs("\\d", "f", 1024).unwrap();
    let core = DispatchCore::new(fs, DispatchConfig::default());
    let open = core.dispatch(Request::new(
        RequestToken(1),
        0,
        Operation::Open {
            path: "\\d".into(),
            options: OpenOptions::default(),
        },
    ));
    let ResponsePayload::Opened { handle, .. } = open.payload else {
        panic!("open failed");
    };

    c.bench_function("query_directory_restart_1024", |b| {
        b.iter(|| {
            let reply = core.dispatch(Request::new(
                RequestToken(2),
                handle,
                Operation::QueryDirectory {
                    pattern: None,
                    marker: None,
                    restart: true,
                    max_bytes: 64 * 1024,
                },
            ));
            black_box(reply)
        });
    });
}

criterion_group!(benches, bench_adaptive_lock, bench_dir_buffer, bench_query_directory);
criterion_main!(benches);
