pub mod channel_models;
pub mod violation_models;

pub use channel_models::ChannelRecord;
pub use violation_models::{NewEvent, PersonMonthlyStat, ViolationEvent};
