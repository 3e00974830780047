// Vehicle counting pipeline: detection, tracking, line crossing and rendering

pub mod counter;
pub mod detection;
pub mod filter;
pub mod geometry;
pub mod live;
pub mod orchestrator;
pub mod processor;
pub mod render;
pub mod session;
pub mod tracker;
pub mod types;
pub mod video_job;
