pub mod calibration;
pub mod context;
pub mod edge;
pub mod engine;
pub mod market;
pub mod matcher;
pub mod normalizer;
pub mod odds;
pub mod resolver;
pub mod teams;

pub use context::FusionContext;
pub use edge::{EdgeReport, Thresholds};
pub use engine::{FusionEngine, GameAggregate, IngestReport, Ingested};
