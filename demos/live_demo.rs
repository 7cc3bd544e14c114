//! Live pipeline against the synthetic depth camera
//!
//! Run with `RUST_LOG=debug` to see per-stage logging.

use std::time::{Duration, Instant};

use silhouette_delaunay::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// A sink that reports where the tracked body's first joint is
struct PrintRig {
    updates: usize,
}

impl SkeletonSink for PrintRig {
    fn update(&mut self, snapshot: &SkeletonSnapshot) {
        self.updates += 1;
        if self.updates % 60 == 1 {
            let joint = snapshot.bodies[0].joints[0];
            info!(bodies = snapshot.body_count(), position = ?joint.position, "rig updated");
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfigBuilder::new()
        .max_points(2048)
        .seed_batch(512)
        .max_records(4096)
        .cell_radius(64)?
        .build()?;
    let backend = SyntheticBackend::new(SyntheticConfig {
        frame_interval: Duration::from_millis(16),
        ..Default::default()
    });
    let stats = backend.stats();

    let mut runtime = PolyRuntime::start(backend, config, DeviceSettings::default())?;
    let mut rig = PrintRig { updates: 0 };

    let started = Instant::now();
    let mut skipped = 0usize;
    for tick in 0..300u32 {
        if tick == 150 {
            runtime.set_settings(DeviceSettings::new(2.0, 0.05)?);
            info!("tightened depth range");
        }
        match runtime.tick_with_sink(&mut rig)? {
            TickOutcome::Processed(counts) => {
                if runtime.frames_processed() % 30 == 1 {
                    info!(
                        seeds = counts.seeds,
                        records = counts.records,
                        dropped = counts.dropped_seeds + counts.dropped_records,
                        "frame triangulated"
                    );
                }
            }
            TickOutcome::Skipped(_) => skipped += 1,
        }
        std::thread::sleep(Duration::from_millis(8));
    }

    #[cfg(feature = "spatial-index")]
    {
        if let Some(index) = SeedIndex::from_seeds(runtime.pipeline().seeds()) {
            let center = Vec2::new(config.width as f32, config.height as f32) * 0.5;
            info!(seed = index.find_nearest(center), "seed nearest the image center");
        }
    }

    let processed = runtime.frames_processed();
    runtime.shutdown()?;
    info!(
        processed,
        skipped,
        captures = stats.captures(),
        leaked_images = stats.images_outstanding(),
        elapsed = ?started.elapsed(),
        "demo complete"
    );
    Ok(())
}
