pub mod error;
pub mod config;
pub mod sparse;
pub mod table;
pub mod graph;
pub mod transforms;
pub mod datasets;
pub mod functional;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod bridge;
pub mod ogc;

pub use error::{Error, Result};
pub use config::{BridgeArgs, BridgeParams, OgcArgs, OgcParams};
pub use graph::{AnyGraph, GraphData, HeteroGraphData, Masks};
pub use sparse::SparseMatrix;
pub use transforms::{build_homo_graph, gcn_norm, Compose, GcnNorm, NormalizeFeatures, Transform};
pub use datasets::{PlanetoidDataset, PlanetoidName, Tacm12kDataset};
pub use bridge::BridgeReport;
pub use ogc::OgcReport;
