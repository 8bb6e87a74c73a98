//! Reader/writer concurrency: searches run against a live writer and
//! must only ever observe fully published nodes — every returned id maps
//! to a vector that was inserted, distances are consistent with the
//! query, and nothing panics or deadlocks.

use simvec::{
    HnswIndex, HnswParams, IndexDescriptor, IndexKey, IndexKind, Metric, Quantization,
    VectorIndex,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

const DIM: usize = 16;

fn vector_for(id: u64) -> Vec<f32> {
    // Deterministic pseudo-random unit-ish vector per id, so readers can
    // verify any returned id against its true payload.
    (0..DIM)
        .map(|d| ((id as f32) * 0.618 + d as f32 * 0.414).sin())
        .collect()
}

fn shared_index() -> Arc<HnswIndex> {
    Arc::new(
        HnswIndex::new(IndexDescriptor {
            key: IndexKey::new("docs", "embedding"),
            kind: IndexKind::Hnsw,
            metric: Metric::L2,
            quantization: Quantization::None,
            dimension: DIM as u32,
            params: HnswParams::default()
                .with_m(8)
                .with_ef_construction(48)
                .with_seed(17),
        })
        .unwrap(),
    )
}

#[test]
fn readers_see_only_published_nodes() {
    const TOTAL: u64 = 2000;
    const READERS: usize = 8;

    let index = shared_index();
    let inserted_up_to = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let index = Arc::clone(&index);
        let inserted_up_to = Arc::clone(&inserted_up_to);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for id in 1..=TOTAL {
                index.add(id, &vector_for(id), None).unwrap();
                inserted_up_to.store(id, Ordering::Release);
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..READERS)
        .map(|reader| {
            let index = Arc::clone(&index);
            let inserted_up_to = Arc::clone(&inserted_up_to);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut queries = 0u64;
                while !done.load(Ordering::Acquire) || queries < 50 {
                    let floor = inserted_up_to.load(Ordering::Acquire);
                    let query = vector_for(reader as u64 * 7919 + queries);
                    let hits = index.search(&query, 10, None, None).unwrap();

                    // Ascending order, no duplicates.
                    for pair in hits.windows(2) {
                        assert!(pair[0].distance <= pair[1].distance);
                        assert_ne!(pair[0].id, pair[1].id);
                    }

                    for hit in &hits {
                        // Only ids from the insert universe ever surface.
                        assert!(
                            hit.id >= 1 && hit.id <= TOTAL,
                            "id {} was never inserted",
                            hit.id
                        );
                        // The payload behind the id decodes to the real
                        // vector: the distance matches a from-scratch
                        // computation (no torn/garbage payloads).
                        let expected = Metric::L2.distance(&query, &vector_for(hit.id));
                        assert!(
                            (hit.distance - expected).abs() <= 1e-4 + expected * 1e-5,
                            "id {} distance {} vs recomputed {expected}",
                            hit.id,
                            hit.distance
                        );
                    }

                    // Once a decent prefix exists, a k=10 search must
                    // return 10 rows.
                    if floor >= 100 {
                        assert_eq!(hits.len(), 10);
                    }
                    queries += 1;
                }
                queries
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        assert!(reader.join().unwrap() >= 50);
    }

    // Quiesced: the full structure is intact and complete.
    index.check_integrity().unwrap();
    assert_eq!(index.len(), TOTAL as usize);
}

#[test]
fn concurrent_removals_never_corrupt_results() {
    const TOTAL: u64 = 800;

    let index = shared_index();
    for id in 1..=TOTAL {
        index.add(id, &vector_for(id), None).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let index = Arc::clone(&index);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            // Remove every third id, then re-insert half of them.
            for id in (3..=TOTAL).step_by(3) {
                index.remove(id).unwrap();
            }
            for id in (3..=TOTAL).step_by(6) {
                index.add(id, &vector_for(id), None).unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|reader| {
            let index = Arc::clone(&index);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut queries = 0u64;
                while !done.load(Ordering::Acquire) || queries < 30 {
                    let query = vector_for(1000 + reader * 31 + queries);
                    let hits = index.search(&query, 5, None, None).unwrap();
                    for hit in &hits {
                        let expected = Metric::L2.distance(&query, &vector_for(hit.id));
                        assert!(
                            (hit.distance - expected).abs() <= 1e-4 + expected * 1e-5,
                            "stale or torn payload for id {}",
                            hit.id
                        );
                    }
                    queries += 1;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    index.check_integrity().unwrap();
}

#[test]
fn cancellation_is_safe_under_concurrency() {
    let index = shared_index();
    for id in 1..=500 {
        index.add(id, &vector_for(id), None).unwrap();
    }

    let token = simvec::CancelToken::new();
    let searcher = {
        let index = Arc::clone(&index);
        let token = token.clone();
        thread::spawn(move || {
            let mut cancelled = 0u32;
            for i in 0..200 {
                let query = vector_for(5000 + i);
                match index.search(&query, 10, Some(200), Some(&token)) {
                    Ok(hits) => assert!(hits.len() <= 10),
                    Err(simvec::Error::Cancelled) => cancelled += 1,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            cancelled
        })
    };
    token.cancel();
    let cancelled = searcher.join().unwrap();
    assert!(cancelled > 0);
    // The index is untouched by cancelled searches.
    index.check_integrity().unwrap();
    assert_eq!(index.len(), 500);
}
