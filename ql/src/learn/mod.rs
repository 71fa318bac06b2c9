pub mod agent;
pub mod epsilon;
pub mod replay_buffer;
pub mod trainer;
