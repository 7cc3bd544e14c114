//! End-to-end run of the public API against the synthetic camera

use std::time::{Duration, Instant};

use silhouette_delaunay::*;

fn config() -> PipelineConfig {
    PipelineConfigBuilder::new()
        .resolution(96, 64)
        .block_size(32)
        .image_block_size(16)
        .max_points(512)
        .seed_batch(128)
        .max_records(2048)
        .cell_radius(32)
        .unwrap()
        .build()
        .unwrap()
}

#[test]
fn test_public_pipeline_outputs_are_consistent() {
    let backend = SyntheticBackend::new(SyntheticConfig {
        width: 96,
        height: 64,
        subject_radius: 18.0,
        frame_interval: Duration::from_millis(1),
        ..Default::default()
    });
    let stats = backend.stats();
    let mut runtime = PolyRuntime::start(backend, config(), DeviceSettings::default()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let counts = loop {
        match runtime.tick().unwrap() {
            TickOutcome::Processed(counts) => break counts,
            TickOutcome::Skipped(_) => {
                assert!(Instant::now() < deadline, "no frame processed in time");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    };

    let pipeline = runtime.pipeline();
    assert_eq!(pipeline.counts(), counts);
    assert_eq!(
        pipeline.counters(),
        [counts.seeds as u32, counts.records as u32]
    );
    assert_eq!(pipeline.seeds().recorded_len(), counts.seeds);
    assert!(counts.seeds > 0);

    // Every record references recorded seeds, in ascending order
    for record in pipeline.records().iter() {
        let ids = record.seeds();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(ids.iter().all(|&id| (id as usize) < counts.seeds));
    }

    // The seed map agrees with the cellular map
    let cellular = pipeline.cellular_map();
    for y in 0..64 {
        for x in 0..96 {
            let expected = cellular
                .claim_at(x, y)
                .and_then(|claim| pipeline.seeds().get(claim.seed as usize))
                .map(SeedPoint::position);
            let stored = *pipeline.seed_map().at(x, y);
            match expected {
                Some(position) => assert_eq!(stored, position),
                None => assert_eq!(stored, Vec2::splat(-1.0)),
            }
        }
    }

    #[cfg(feature = "spatial-index")]
    {
        let index = SeedIndex::from_seeds(pipeline.seeds()).unwrap();
        let first = pipeline.seeds().get(0).unwrap();
        assert_eq!(index.find_nearest(first.position()), 0);
    }

    runtime.shutdown().unwrap();
    assert_eq!(stats.images_outstanding(), 0);
}
