//! End-to-end scenarios through the public extension surface: the DDL
//! path, column binding, write hooks, the plan hook, and the memory cap.

use simvec::sql::{ddl, DdlStatement, PlanDecision, PlanHook, QueryShape, SqlValue};
use simvec::{
    Error, ExtensionConfig, HnswParams, IndexDescriptor, IndexKey, IndexKind, IndexRegistry,
    MemoryBackend, Metric, Quantization, VectorIndex, VectorType,
};
use std::sync::Arc;

fn registry() -> IndexRegistry {
    IndexRegistry::new(ExtensionConfig::default(), Arc::new(MemoryBackend::new()))
}

/// Cardinal directions under cosine: query leaning +x returns +x then +y.
#[test]
fn cardinal_cosine_topk() {
    let reg = registry();
    let key = IndexKey::new("docs", "embedding");
    reg.create_index(
        IndexDescriptor {
            key: key.clone(),
            kind: IndexKind::Hnsw,
            metric: Metric::Cosine,
            quantization: Quantization::None,
            dimension: 2,
            params: HnswParams::default()
                .with_m(4)
                .with_ef_construction(8)
                .with_ef_search(8)
                .with_seed(42),
        },
        4,
    )
    .unwrap();

    reg.on_write_vector(&key, 1, &[1.0, 0.0]).unwrap();
    reg.on_write_vector(&key, 2, &[0.0, 1.0]).unwrap();
    reg.on_write_vector(&key, 3, &[-1.0, 0.0]).unwrap();
    reg.on_write_vector(&key, 4, &[0.0, -1.0]).unwrap();

    let hits = reg.search(&key, &[0.9, 0.1], 2, None, None).unwrap();
    let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

/// DDL to plan hook, end to end: CREATE VECTOR INDEX, bind writes through
/// the column type, recognize the ORDER BY shape, execute the probe.
#[test]
fn ddl_to_probe_flow() {
    let config = ExtensionConfig::default();
    let reg = IndexRegistry::new(config.clone(), Arc::new(MemoryBackend::new()));

    // Host side: the column was declared VECTOR(4).
    let column = VectorType::new(config.max_dimensions)
        .accept_type("VECTOR(4)")
        .unwrap()
        .unwrap();

    // DDL arrives as text; the extension owns parsing and registration.
    let statement = ddl::parse_ddl(
        "CREATE VECTOR INDEX idx ON docs(embedding) USING HNSW \
         WITH (metric = 'l2', m = 8, ef_construction = 32, seed = 11)",
    )
    .unwrap();
    let DdlStatement::CreateIndex(create) = statement else {
        panic!("expected create");
    };
    let descriptor = create.into_descriptor(&config, column.dimension).unwrap();
    let key = descriptor.key.clone();
    reg.create_index(descriptor, 100).unwrap();

    // Writes go through bind-time validation, then the post-commit hook.
    for (id, floats) in [
        (1u64, vec![0.0f32, 0.0, 0.0, 0.0]),
        (2, vec![1.0, 0.0, 0.0, 0.0]),
        (3, vec![0.0, 2.0, 0.0, 0.0]),
    ] {
        let bytes = column.encode_write(&SqlValue::Text(
            serde_json::to_string(&floats).unwrap(),
        ))
        .unwrap();
        reg.on_write(&key, id, &bytes).unwrap();
    }

    // The planner offers the top-k shape; the hook rewrites it.
    let hook = PlanHook::new(&reg);
    let decision = hook
        .rewrite(&QueryShape {
            table: "docs",
            order_by: "distance_l2(embedding, :q)",
            ascending: true,
            limit: 2,
            offset: 0,
            prefilter_selectivity: None,
        })
        .unwrap();
    let PlanDecision::IndexProbe { key: probe_key, fetch, .. } = decision else {
        panic!("expected probe, got {decision:?}");
    };
    assert_eq!(probe_key, key);

    let hits = reg.search(&probe_key, &[0.1, 0.0, 0.0, 0.0], fetch, None, None).unwrap();
    let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

/// Dimension mismatch: a length-127 write against VECTOR(128) is rejected
/// at the boundary with no index state change.
#[test]
fn dimension_mismatch_is_rejected_cleanly() {
    let config = ExtensionConfig::default();
    let reg = registry();
    let key = IndexKey::new("docs", "embedding");
    reg.create_index(
        IndexDescriptor {
            key: key.clone(),
            kind: IndexKind::Hnsw,
            metric: Metric::Cosine,
            quantization: Quantization::None,
            dimension: 128,
            params: HnswParams::default().with_seed(1),
        },
        0,
    )
    .unwrap();

    let column = VectorType::new(config.max_dimensions)
        .accept_type("VECTOR(128)")
        .unwrap()
        .unwrap();

    let short = vec![0.5f32; 127];
    assert!(matches!(
        column.encode_floats(&short),
        Err(Error::DimensionMismatch {
            expected: 128,
            actual: 127
        })
    ));
    // Forcing it past the column check still fails at the index boundary.
    assert!(matches!(
        reg.on_write_vector(&key, 1, &short),
        Err(Error::DimensionMismatch { .. })
    ));
    assert_eq!(reg.get_or_load(&key).unwrap().len(), 0);
}

/// Memory cap: a 1 MiB budget refuses an index sized ~5 MiB with no
/// partial state.
#[test]
fn memory_cap_refuses_oversized_index() {
    let reg = IndexRegistry::new(
        ExtensionConfig::default().with_max_memory_mb(1),
        Arc::new(MemoryBackend::new()),
    );
    // ~8000 rows × 768-dim f32 ≈ 24 MiB of payload alone.
    let result = reg.create_index(
        IndexDescriptor {
            key: IndexKey::new("docs", "embedding"),
            kind: IndexKind::Hnsw,
            metric: Metric::Cosine,
            quantization: Quantization::None,
            dimension: 768,
            params: HnswParams::default().with_seed(2),
        },
        8000,
    );
    match result {
        Err(Error::MemoryBudgetExceeded { requested, budget }) => {
            assert_eq!(budget, 1024 * 1024);
            assert!(requested > budget);
        }
        other => panic!("expected budget refusal, got {other:?}"),
    }
    assert!(reg.enumerate().is_empty());
}

/// Hamming-metric DDL requires binary quantization; the valid pairing
/// works end to end.
#[test]
fn hamming_requires_binary_pairing() {
    let config = ExtensionConfig::default();
    let bad = ddl::parse_ddl("CREATE INDEX i ON t(c) WITH (metric = 'hamming')").unwrap();
    let DdlStatement::CreateIndex(bad) = bad else {
        panic!("expected create");
    };
    assert!(matches!(
        bad.into_descriptor(&config, 64),
        Err(Error::Config(_))
    ));

    let good = ddl::parse_ddl(
        "CREATE INDEX i ON t(c) WITH (metric = 'hamming', quantization = 'binary', seed = 5)",
    )
    .unwrap();
    let DdlStatement::CreateIndex(good) = good else {
        panic!("expected create");
    };
    let descriptor = good.into_descriptor(&config, 64).unwrap();
    let key = descriptor.key.clone();

    let reg = registry();
    reg.create_index(descriptor, 0).unwrap();
    reg.on_write_vector(&key, 1, &[1.0; 64]).unwrap();
    reg.on_write_vector(&key, 2, &[-1.0; 64]).unwrap();
    let hits = reg.search(&key, &[1.0; 64], 2, None, None).unwrap();
    assert_eq!(hits[0].id, 1);
    assert_eq!(hits[0].distance, 0.0);
    assert_eq!(hits[1].distance, 64.0);
}

/// DROP INDEX through the DDL path.
#[test]
fn drop_index_flow() {
    let reg = registry();
    let key = IndexKey::new("docs", "embedding");
    reg.create_index(
        IndexDescriptor {
            key: key.clone(),
            kind: IndexKind::Flat,
            metric: Metric::L2,
            quantization: Quantization::None,
            dimension: 2,
            params: HnswParams::default(),
        },
        0,
    )
    .unwrap();

    let statement = ddl::parse_ddl("DROP VECTOR INDEX idx ON docs").unwrap();
    let DdlStatement::DropIndex { table, .. } = statement else {
        panic!("expected drop");
    };
    assert_eq!(table.as_deref(), Some("docs"));
    reg.drop_index(&key).unwrap();
    assert!(matches!(
        reg.search(&key, &[0.0, 0.0], 1, None, None),
        Err(Error::NoSuchIndex { .. })
    ));
}
