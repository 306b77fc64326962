pub mod channels;
pub mod violations;

pub use channels::ChannelsRepository;
pub use violations::ViolationsRepository;
