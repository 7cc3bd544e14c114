//! Real-time silhouette triangulation from a depth camera
//!
//! A background thread captures synchronized color, depth and body-index
//! frames and hands the freshest one over without blocking. Each tick, the
//! frame is unprojected, seeds are extracted along the tracked body's
//! silhouette, a discretized Voronoi tessellation is computed over them,
//! and the adjacency of its cells is reduced to a deduplicated list of
//! Delaunay edges and triangles.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use silhouette_delaunay::*;
//!
//! let config = PipelineConfigBuilder::new()
//!     .max_points(2048)
//!     .seed_batch(1024)
//!     .build()
//!     .unwrap();
//!
//! let backend = SyntheticBackend::new(SyntheticConfig::default());
//! let mut runtime = PolyRuntime::start(backend, config, DeviceSettings::default()).unwrap();
//!
//! loop {
//!     match runtime.tick().unwrap() {
//!         TickOutcome::Processed(counts) => {
//!             // Draw `counts.records` records from `runtime.pipeline().records()`
//!             println!("{} triangles/edges", counts.records);
//!             break;
//!         }
//!         TickOutcome::Skipped(_) => std::thread::sleep(std::time::Duration::from_millis(5)),
//!     }
//! }
//! runtime.shutdown().unwrap();
//! ```
//!
//! # Features
//!
//! - `spatial-index` (default): KD-tree lookups from positions to seeds
//! - `serde`: Serialization support for configuration

// Modules
pub mod error;
pub mod config;
pub mod grid;
pub mod arena;
pub mod calibration;
pub mod device;
pub mod skeleton;
pub mod capture;
pub mod surfaces;
pub mod pipeline;
pub mod runtime;

#[cfg(feature = "spatial-index")]
pub mod spatial;

// Re-export core types for convenience
pub use error::{PolyError, Result};
pub use config::{DeviceSettings, PipelineConfig, PipelineConfigBuilder};
pub use grid::Grid;
pub use arena::{AppendList, Packed};
pub use calibration::{Calibration, XyTable, XyTableCache};
pub use device::{
    BodyTracker, Capture, DepthDevice, DeviceBackend, Image, ImageFormat, SyntheticBackend,
    SyntheticConfig, SyntheticStats, TrackerResult,
};
pub use skeleton::{Body, Joint, JointConfidence, SkeletonSink, SkeletonSnapshot};
pub use capture::{CaptureDriver, FrameReceiver, LockedFrame, SettingsCell};
pub use surfaces::FrameSurfaces;
pub use pipeline::{
    CellularMap, Claim, GeometryPipeline, PipelineCounts, SeedInputs, SeedPoint, SeedSource,
    SilhouetteEdgeSeeds, Stage, TriangleRecord,
};
pub use runtime::{PolyRuntime, SkipReason, TickOutcome};

#[cfg(feature = "spatial-index")]
pub use spatial::SeedIndex;

// Re-export glam types used in the public API
pub use glam::{Vec2, Vec4};
