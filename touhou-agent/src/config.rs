use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use ql::learn::agent::AgentParameter;
use ql::learn::epsilon::EpsilonSchedule;
use ql::learn::trainer::Parameter;
use ql::ml_model::burn_model::QNetworkConfig;

use crate::device::ScreenRegion;
use crate::keys::Key;
use crate::perception::PerceptionConfig;
use crate::recovery::RecoveryConfig;
use crate::reward::RewardStrategy;

lazy_static!(
    /// 13 entries: nothing, 4 directions, 4 diagonals, 4 focused directions
    pub static ref DEFAULT_ACTION_CATALOG: Vec<Vec<Key>> = vec![
        vec![],
        vec![Key::Up],
        vec![Key::Down],
        vec![Key::Left],
        vec![Key::Right],
        vec![Key::Up, Key::Left],
        vec![Key::Up, Key::Right],
        vec![Key::Down, Key::Left],
        vec![Key::Down, Key::Right],
        vec![Key::Shift, Key::Left],
        vec![Key::Shift, Key::Right],
        vec![Key::Shift, Key::Up],
        vec![Key::Shift, Key::Down],
    ];
);

pub const ENV_EPISODES: &str = "TOUHOU_EPISODES";
pub const ENV_MODEL_PATH: &str = "TOUHOU_MODEL_PATH";
pub const ENV_IMG_DIR: &str = "TOUHOU_IMG_DIR";
pub const ENV_REWARD: &str = "TOUHOU_REWARD";
pub const ENV_RESUME: &str = "TOUHOU_RESUME";

#[derive(Debug, Clone, PartialEq)]
pub struct TimingConfig {
    /// dwell time after each action
    pub frame_interval: Duration,
    /// how often an action is re-applied within one step (after the first application)
    pub action_repeats: usize,
    pub repeat_pause: Duration,
    /// wait after the game window got activated
    pub focus_settle: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / 60.0),
            action_repeats: 2,
            repeat_pause: Duration::from_millis(50),
            focus_settle: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearningConfig {
    pub learning_rate: f64,
    pub gamma: f32,
    pub epsilon: EpsilonSchedule,
    pub batch_size: usize,
    pub replay_buffer_len: usize,
    pub episodes: usize,
    pub running_reward_window: usize,
    pub stats_after_episodes: usize,
    pub checkpoint_after_episodes: usize,
    /// without the `.mpk` extension
    pub model_path: PathBuf,
    /// continue from the model at `model_path`
    pub resume: bool,
}

impl Default for LearningConfig {
    fn default() -> Self {
        let agent = AgentParameter::default();
        let trainer = Parameter::default();
        Self {
            learning_rate: 0.001,
            gamma: agent.gamma,
            epsilon: trainer.epsilon,
            batch_size: agent.batch_size,
            replay_buffer_len: agent.replay_buffer_len,
            episodes: trainer.episodes,
            running_reward_window: trainer.episode_reward_history_buffer_len,
            stats_after_episodes: trainer.stats_after_episodes,
            checkpoint_after_episodes: trainer.checkpoint_after_episodes,
            model_path: trainer.model_path,
            resume: false,
        }
    }
}

/// Everything the agent needs to know; fixed at program start
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub screen_region: ScreenRegion,
    /// (width, height)
    pub observation_size: (u32, u32),
    pub window_title: String,
    pub actions: Vec<Vec<Key>>,
    pub always_on: Key,
    pub timing: TimingConfig,
    pub perception: PerceptionConfig,
    pub reward: RewardStrategy,
    pub recovery: RecoveryConfig,
    /// directory of the reference images
    pub image_dir: PathBuf,
    pub learning: LearningConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            screen_region: ScreenRegion { top: 20, left: 302, width: 962, height: 747 },
            observation_size: (256, 256),
            window_title: "Touhou Scarlet Devil Land ~ The Embodiment of Scarlet Devil v1.02h".to_string(),
            actions: DEFAULT_ACTION_CATALOG.clone(),
            always_on: Key::Z,
            timing: TimingConfig::default(),
            perception: PerceptionConfig::default(),
            reward: RewardStrategy::default(),
            recovery: RecoveryConfig::default(),
            image_dir: PathBuf::from("img"),
            learning: LearningConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, overridden by `TOUHOU_*` environment variables
    pub fn from_env() -> Result<Self> { Self::default().with_overrides(|key| env::var(key).ok()) }

    /// Applies overrides looked up by `lookup`; unparsable values are errors
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(episodes) = parse_override(&lookup, ENV_EPISODES)? {
            self.learning.episodes = episodes;
        }
        if let Some(path) = lookup(ENV_MODEL_PATH) {
            self.learning.model_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(ENV_IMG_DIR) {
            self.image_dir = PathBuf::from(dir);
        }
        if let Some(reward) = parse_override(&lookup, ENV_REWARD)? {
            self.reward = reward;
        }
        if let Some(resume) = lookup(ENV_RESUME) {
            self.learning.resume = parse_flag(&resume).with_context(|| format!("invalid value for {}", ENV_RESUME))?;
        }
        Ok(self)
    }

    pub fn network_config(&self) -> QNetworkConfig {
        let (width, height) = self.observation_size;
        QNetworkConfig::new(1, height as usize, width as usize, self.actions.len())
    }

    pub fn agent_parameter(&self) -> AgentParameter {
        AgentParameter {
            gamma: self.learning.gamma,
            batch_size: self.learning.batch_size,
            replay_buffer_len: self.learning.replay_buffer_len,
        }
    }

    pub fn trainer_parameter(&self) -> Parameter {
        Parameter {
            episodes: self.learning.episodes,
            epsilon: self.learning.epsilon,
            episode_reward_history_buffer_len: self.learning.running_reward_window,
            stats_after_episodes: self.learning.stats_after_episodes,
            checkpoint_after_episodes: self.learning.checkpoint_after_episodes,
            model_path: self.learning.model_path.clone(),
        }
    }
}

fn parse_override<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|value| value.trim().parse::<T>().map_err(|e| anyhow!("invalid value '{}' for {}: {}", value, key, e)))
        .transpose()
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("'{}' is not a boolean", other)),
    }
}
