//! Flat-index exactness: search returns exactly the k smallest distances
//! in ascending order, ties broken by the smaller id, verified against an
//! independent scalar scan.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simvec::metric::scalar;
use simvec::{
    FlatIndex, HnswParams, IndexDescriptor, IndexKey, IndexKind, Metric, Quantization,
    VectorIndex,
};

fn flat(dim: u32, metric: Metric) -> FlatIndex {
    FlatIndex::new(IndexDescriptor {
        key: IndexKey::new("t", "v"),
        kind: IndexKind::Flat,
        metric,
        quantization: Quantization::None,
        dimension: dim,
        params: HnswParams::default(),
    })
    .unwrap()
}

/// Reference top-k: full scalar scan sorted by (distance, id).
fn reference_topk(data: &[(u64, Vec<f32>)], query: &[f32], metric: Metric, k: usize) -> Vec<u64> {
    let mut scored: Vec<(f32, u64)> = data
        .iter()
        .map(|(id, v)| {
            let d = match metric {
                Metric::L2 => scalar::l2_sq(query, v).sqrt(),
                Metric::Cosine => scalar::cosine(query, v),
                Metric::Dot => -scalar::dot(query, v),
                Metric::Hamming => unreachable!(),
            };
            (d, *id)
        })
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn flat_matches_reference(
        vectors in prop::collection::vec(prop::collection::vec(-100.0f32..100.0, 4), 1..120),
        query in prop::collection::vec(-100.0f32..100.0, 4),
        k in 1usize..20,
    ) {
        let index = flat(4, Metric::L2);
        let data: Vec<(u64, Vec<f32>)> = vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i as u64 + 1, v))
            .collect();
        for (id, v) in &data {
            index.add(*id, v, None).unwrap();
        }

        let hits = index.search(&query, k, None, None).unwrap();
        let expected = reference_topk(&data, &query, Metric::L2, k);
        let got: Vec<u64> = hits.iter().map(|h| h.id).collect();
        prop_assert_eq!(got, expected);

        // Ascending distances.
        prop_assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }
}

/// A thousand random 64-dim vectors: the indexed top-10 equals the direct
/// scalar computation, ordered, ties by id.
#[test]
fn thousand_random_vectors_match_direct_scan() {
    let mut rng = StdRng::seed_from_u64(7);
    let dim = 64;
    let data: Vec<(u64, Vec<f32>)> = (0..1000)
        .map(|i| {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            (i + 1, v)
        })
        .collect();

    for metric in [Metric::L2, Metric::Cosine, Metric::Dot] {
        let index = flat(dim as u32, metric);
        for (id, v) in &data {
            index.add(*id, v, None).unwrap();
        }
        let query: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();

        let hits = index.search(&query, 10, None, None).unwrap();
        let got: Vec<u64> = hits.iter().map(|h| h.id).collect();
        let expected = reference_topk(&data, &query, metric, 10);
        assert_eq!(got, expected, "metric {metric:?}");
    }
}

#[test]
fn k_larger_than_live_set() {
    let index = flat(2, Metric::L2);
    for i in 1..=5u64 {
        index.add(i, &[i as f32, 0.0], None).unwrap();
    }
    index.remove(2).unwrap();
    let hits = index.search(&[0.0, 0.0], 10, None, None).unwrap();
    let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
    assert_eq!(ids, vec![1, 3, 4, 5]);
}

#[test]
fn tombstones_never_surface() {
    let mut rng = StdRng::seed_from_u64(11);
    let index = flat(8, Metric::Cosine);
    for i in 1..=200u64 {
        let v: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        index.add(i, &v, None).unwrap();
    }
    for i in (1..=200u64).step_by(2) {
        index.remove(i).unwrap();
    }
    let query: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let hits = index.search(&query, 50, None, None).unwrap();
    assert_eq!(hits.len(), 50);
    assert!(hits.iter().all(|h| h.id % 2 == 0));
}
