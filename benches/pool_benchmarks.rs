//! Performance benchmarks for pool map throughput
//! Measures hand-off overhead per task with in-process worker threads

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use procpool::{Pool, PoolConfig, Registry, TaskFn, ThreadLauncher};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::Mutex;

struct Square;

impl TaskFn for Square {
    const NAME: &'static str = "square";
    type Input = u64;
    type Output = u64;

    fn call(&self, input: u64) -> anyhow::Result<u64> {
        Ok(input.wrapping_mul(input))
    }
}

fn start_pool(rt: &Runtime, processes: usize) -> Arc<Mutex<Pool>> {
    let _guard = rt.enter();
    let mut registry = Registry::new();
    registry.register(Square);
    let launcher = Arc::new(ThreadLauncher::new(Arc::new(registry)));
    let config = PoolConfig::default().with_processes(processes);
    Arc::new(Mutex::new(Pool::with_launcher(config, launcher).unwrap()))
}

fn bench_map_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("map_throughput");

    for processes in [1, 2, 4] {
        let pool = start_pool(&rt, processes);
        for tasks in [10u64, 100, 1000] {
            group.throughput(Throughput::Elements(tasks));
            group.bench_with_input(
                BenchmarkId::new(format!("{}_workers", processes), tasks),
                &tasks,
                |b, &tasks| {
                    b.to_async(&rt).iter(|| {
                        let pool = Arc::clone(&pool);
                        async move {
                            let mut pool = pool.lock().await;
                            let results = pool.map_collect(&Square, 0..tasks).await.unwrap();
                            black_box(results)
                        }
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_ordering_buffer(c: &mut Criterion) {
    use procpool::pool::buffer::ResultBuffer;

    let mut group = c.benchmark_group("result_buffer");
    for len in [100usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("reverse_fill", len), &len, |b, &len| {
            b.iter(|| {
                let mut buffer = ResultBuffer::new(len);
                for index in (0..len).rev() {
                    buffer.fill(index, index).unwrap();
                }
                let mut sum = 0usize;
                while let Some(value) = buffer.take_next() {
                    sum += value;
                }
                black_box(sum)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_map_throughput, bench_ordering_buffer);
criterion_main!(benches);
