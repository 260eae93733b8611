//! Segregated heap benchmarks.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use segalloc::{ArenaGrowth, SegregatedHeap};

fn heap() -> SegregatedHeap<ArenaGrowth> {
  SegregatedHeap::new(ArenaGrowth::new(256 << 20).expect("arena")).expect("heap")
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
  let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
  let mut group = c.benchmark_group("alloc_free_cycle");

  for &size in sizes {
    group.bench_with_input(BenchmarkId::new("segregated", size), &size, |b, &sz| {
      let mut heap = heap();
      b.iter(|| {
        let ptr = heap.allocate(black_box(sz)).unwrap().unwrap();
        unsafe { heap.deallocate(ptr.as_ptr()) };
      });
    });
    group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
      b.iter(|| {
        let v = vec![0u8; sz];
        black_box(v);
      });
    });
  }
  group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
  let mut group = c.benchmark_group("alloc_burst");

  group.bench_function("1000x64B", |b| {
    let mut heap = heap();
    let mut ptrs = Vec::with_capacity(1000);
    b.iter(|| {
      for _ in 0..1000 {
        ptrs.push(heap.allocate(64).unwrap().unwrap());
      }
      for ptr in ptrs.drain(..) {
        unsafe { heap.deallocate(ptr.as_ptr()) };
      }
    });
  });

  group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
  let mut group = c.benchmark_group("realloc_growth");

  group.bench_function("16B_to_64KiB_doubling", |b| {
    let mut heap = heap();
    b.iter(|| unsafe {
      let mut ptr = heap.allocate(16).unwrap().unwrap();
      let mut size = 16;
      while size < 64 * 1024 {
        size *= 2;
        ptr = heap.reallocate(ptr.as_ptr(), size).unwrap().unwrap();
      }
      heap.deallocate(ptr.as_ptr());
    });
  });

  group.finish();
}

fn bench_check(c: &mut Criterion) {
  let mut heap = heap();
  let ptrs: Vec<_> = (0..2000)
    .map(|i| heap.allocate(16 + (i * 37) % 2000).unwrap().unwrap())
    .collect();
  for ptr in ptrs.iter().step_by(2) {
    unsafe { heap.deallocate(ptr.as_ptr()) };
  }

  c.bench_function("check_2000_blocks", |b| {
    b.iter(|| black_box(heap.check()));
  });
}

criterion_group!(
  benches,
  bench_alloc_free_cycle,
  bench_alloc_burst,
  bench_realloc_growth,
  bench_check
);
criterion_main!(benches);
