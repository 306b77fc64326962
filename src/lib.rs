pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod snapshot;
pub mod stream;
pub mod track;

pub use error::Error;

// Re-export main components for easier use
pub use detect::{Detector, GuardedDetector, PersonDetection};
pub use gateway::ViolationGateway;
pub use pipeline::ChannelPipeline;
pub use stream::{
    ChannelHealth, ChannelManager, ChannelStatus, Connector, Frame, StreamSupervisor, StreamTarget,
};
pub use track::ViolationTracker;
