pub mod condition;
mod detector;
mod engine;
mod window;
mod worker;

pub use self::detector::{
    meme_signal_detector, whale_activity_detector, ConditionDetector, Detector, DetectorBuilder,
    DetectorRegistry,
};
pub use self::engine::{shard_for_token, DetectorEngine, WorkerSnapshot};
pub use self::window::TokenWindow;
