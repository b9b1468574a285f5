//! Concord Session - Collaboration Tracking
//!
//! Sessions move `initiated -> active -> (completed | cancelled | failed)`.
//! Each recorded event carries a fixed impact on productivity, quality,
//! engagement and consensus; metrics and patterns are derived from them.

mod analytics;
mod tracker;

pub use analytics::{participant_key, participant_overlap};
pub use tracker::CollaborationSessionTracker;
