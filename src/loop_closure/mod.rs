//! Loop closure detection: place recognition over keyframes, geometric
//! verification of candidates and pose-graph correction of the odometry.

pub mod descriptor;
pub mod detector;
pub mod factors;
pub mod frame_store;
pub mod islands;
pub mod params;
pub mod payloads;
pub mod place_index;
pub mod pose_graph;
pub mod types;
pub mod worker;

pub use descriptor::BriefExtractor;
pub use detector::LoopClosureDetector;
pub use factors::{EdgeType, Factor, GraphFactor, LoopClosureFactor, NoiseModel, OdometryFactor};
pub use frame_store::{LcdFrame, LcdFrameStore};
pub use params::LcdParams;
pub use payloads::{LcdInputPayload, LcdOutputPayload, PoseGraphSnapshot};
pub use place_index::{BowDatabase, PlaceIndex, PlaceMatch, Vocabulary};
pub use pose_graph::{PoseGraph, PoseGraphConfig, PoseGraphSolver};
pub use types::{
    GeomVerifOption, IslandScoring, LcdDebugInfo, LcdStatus, LoopResult, MatchIsland, PoseRecoveryOption,
};
pub use worker::{spawn_lcd_worker, LcdSharedState, LcdStats};
