//! Deep-Q-Learning agent for a bullet hell shooter, playing from screen pixels with synthetic key presses.

pub mod action_mapper;
pub mod capture;
pub mod config;
pub mod device;
pub mod environment;
pub mod keys;
pub mod mock;
pub mod perception;
pub mod platform;
pub mod recovery;
pub mod reward;
pub mod templates;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    env_logger::builder()
        .format_timestamp_secs()
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .is_test(true)
        .init()
}
