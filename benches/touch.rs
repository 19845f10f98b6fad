use std::fs;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, BatchSize, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};
use tempfile::tempdir;

use access_history::{EpochAdvancer, EpochState, Fid, HistoryLayout, ObjectStore, TierLinker};

const TOUCHES_PER_ITER: u32 = 1_000;

fn bench_touch(c: &mut Criterion) {
    let mut group = c.benchmark_group("touch");
    // `distinct` FIDs touched round-robin: 1 is all replays, 1000 is all first touches.
    for &distinct in &[1_u32, 100, 1_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(distinct),
            &distinct,
            |b, &distinct| {
                b.iter_batched(
                    || {
                        let dir = tempdir().expect("tempdir");
                        let layout = HistoryLayout::new(dir.path());
                        for path in layout.skeleton() {
                            fs::create_dir_all(path).expect("skeleton");
                        }
                        let epoch = Arc::new(EpochState::new(Duration::from_secs(3600)));
                        EpochAdvancer::new(layout.clone(), Arc::clone(&epoch))
                            .advance(1_700_000_000)
                            .expect("advance");
                        let store = ObjectStore::new(layout.fids_dir());
                        (dir, store, epoch)
                    },
                    |(_dir, store, epoch)| {
                        let linker = TierLinker::new();
                        for n in 0..TOUCHES_PER_ITER {
                            let fid = Fid::new(0x200000401, n % distinct, 0);
                            let marker = store.ensure_marker(black_box(&fid)).expect("marker");
                            epoch
                                .with_active(|active| linker.link_into(active, &fid, &marker))
                                .expect("link");
                        }
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_touch);
criterion_main!(benches);
