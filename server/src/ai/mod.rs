//! AI traffic engine.
//!
//! Splines are loaded from a memory-mapped cache ([`spline`]) built from the
//! track's lane files ([`builder`]). Each AI car is an [`state::AiState`]
//! moving point to point; [`driver::AiTraffic`] owns them per slot.

pub mod builder;
pub mod driver;
pub mod junction;
pub mod kdtree;
pub mod slowest;
pub mod spline;
pub mod state;

use std::sync::Arc;

use log::info;

pub use driver::AiTraffic;
pub use junction::JunctionEvaluator;
pub use slowest::{SlowestAiStates, SlowestEntry};
pub use spline::{AiSpline, SplineJunction, SplinePoint};
pub use state::AiState;

use crate::config::AiConfig;
use crate::entry_car::EntryCar;
use crate::error::{Error, Result};

/// Loads the spline and sets up traffic, or `None` when AI is disabled.
pub fn load_traffic(config: &AiConfig, cars: &[EntryCar]) -> Result<Option<AiTraffic>> {
    if !config.enabled {
        return Ok(None);
    }
    let source = config
        .spline_dir
        .as_deref()
        .ok_or_else(|| Error::config("ai.spline_dir is required when AI is enabled"))?;
    let spline = builder::load_or_build(source, &config.cache_dir, config.lane_width)?;
    info!(
        "AI traffic ready: {} spline points, {} junctions",
        spline.num_points(),
        spline.num_junctions()
    );
    Ok(Some(AiTraffic::new(Arc::new(spline), config, cars)))
}
