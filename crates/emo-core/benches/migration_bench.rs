//! Migration throughput between in-memory tiers.

use std::sync::Arc;

use bytes::Bytes;
use criterion::{Criterion, criterion_group, criterion_main};

use emo_common::types::{TierDescriptor, TierId};
use emo_core::{BufferRegistry, CapacityModel, MemoryTier, MigrationEngine, Tier, TierSet};

fn bench_migrate(c: &mut Criterion) {
    let fast = TierId::new(0);
    let slow = TierId::new(1);
    let cap = 1 << 30;

    let registry = Arc::new(BufferRegistry::new());
    let tiers = Arc::new(
        TierSet::new(vec![
            Arc::new(MemoryTier::new(fast, 0, cap)) as Arc<dyn Tier>,
            Arc::new(MemoryTier::new(slow, 1, cap)) as Arc<dyn Tier>,
        ])
        .unwrap(),
    );
    let capacity = Arc::new(CapacityModel::new(&[
        TierDescriptor {
            id: fast,
            rank: 0,
            capacity: cap,
            used: 0,
            admission_threshold: 0.9,
        },
        TierDescriptor {
            id: slow,
            rank: 1,
            capacity: cap,
            used: 0,
            admission_threshold: 0.9,
        },
    ]));
    let engine = MigrationEngine::new(
        Arc::clone(&registry),
        Arc::clone(&tiers),
        Arc::clone(&capacity),
        2,
    );

    let size = 64 * 1024;
    let payload = Bytes::from(vec![0xA5u8; size as usize]);

    c.bench_function("migrate_64k_mem_to_mem", |b| {
        b.iter(|| {
            capacity.try_reserve(fast, size).unwrap();
            let handle = registry.create(size, fast);
            let addr = tiers.get(fast).unwrap().write(payload.clone()).unwrap();
            registry.commit_initial(handle, fast, addr).unwrap();

            capacity.try_reserve(slow, size).unwrap();
            engine.migrate(handle, slow).unwrap();

            let record = registry.release(handle).unwrap();
            tiers.get(slow).unwrap().free(record.addr, size).unwrap();
            capacity.release(slow, size).unwrap();
        });
    });
}

criterion_group!(benches, bench_migrate);
criterion_main!(benches);
