pub mod correlator;
pub mod tracker;

pub use correlator::{PersonCorrelator, PersonTrack, TrackId};
pub use tracker::{EventKey, Transition, ViolationTracker};
