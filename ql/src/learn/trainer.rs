use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use itertools::Itertools;
use num_format::ToFormattedString;
use rustc_hash::FxHashMap;

use crate::learn::agent::DqnAgent;
use crate::learn::epsilon::{Epsilon, EpsilonSchedule};
use crate::learn::replay_buffer::ReplayBuffer;
use crate::ml_model::model::QValueModel;
use crate::prelude::Environment;
use crate::util::format;
use crate::util::immutable::Immutable;

#[derive(Debug, Clone)]
pub struct Parameter {
    /// Number of episodes to train
    pub episodes: usize,
    pub epsilon: EpsilonSchedule,
    /// Number of most recent episodes the running reward is averaged over
    pub episode_reward_history_buffer_len: usize,
    /// Log the action distribution every n episodes
    pub stats_after_episodes: usize,
    /// Persist an intermediate checkpoint every n episodes (0 = only at the end)
    pub checkpoint_after_episodes: usize,
    /// Where the trained model goes
    pub model_path: PathBuf,
}

impl Default for Parameter {
    fn default() -> Self {
        Self {
            episodes: 1000,
            epsilon: EpsilonSchedule::default(),
            episode_reward_history_buffer_len: 100,
            stats_after_episodes: 10,
            checkpoint_after_episodes: 50,
            model_path: PathBuf::from("models/touhou_ai"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub steps: usize,
    pub reward: f32,
    pub epsilon: f64,
    /// Whether the episode reached a terminal state (false when interrupted)
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub episodes: usize,
    pub steps: usize,
    pub running_reward: Option<f32>,
    pub interrupted: bool,
}

/// Drives a [DqnAgent] through a fixed number of episodes of an [Environment]
pub struct Trainer<E, M>
where
    E: Environment,
    M: QValueModel<S = E::S>,
{
    environment: E,
    agent: DqnAgent<M>,
    param: Immutable<Parameter>,
    epsilon: Epsilon,
    episode_rewards: ReplayBuffer<f32>,
    episode_count: usize,
    step_count: usize,
    stop_signal: Arc<AtomicBool>,
}

impl<E, M> Trainer<E, M>
where
    E: Environment,
    M: QValueModel<S = E::S>,
{
    pub fn new(
        environment: E,
        agent: DqnAgent<M>,
        param: Parameter,
    ) -> Self {
        assert_eq!(environment.action_space(), agent.action_space(), "environment and model disagree on the action space");
        Self {
            environment,
            agent,
            epsilon: Epsilon::new(param.epsilon),
            episode_rewards: ReplayBuffer::new(param.episode_reward_history_buffer_len.max(1)),
            param: Immutable::new(param),
            episode_count: 0,
            step_count: 0,
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Training stops at the next step once `signal` is set
    pub fn with_stop_signal(
        mut self,
        signal: Arc<AtomicBool>,
    ) -> Self {
        self.stop_signal = signal;
        self
    }

    pub fn environment(&self) -> &E { &self.environment }

    pub fn agent(&self) -> &DqnAgent<M> { &self.agent }

    pub fn epsilon(&self) -> f64 { self.epsilon.value() }

    pub fn running_reward(&self) -> Option<f32> { self.episode_rewards.mean() }

    fn stop_requested(&self) -> bool { self.stop_signal.load(Ordering::Relaxed) }

    /// Runs all episodes, persists the model and closes the environment - the latter also when training fails
    pub fn run(&mut self) -> Result<TrainingSummary> {
        log::info!("starting training for {} episodes", self.param.episodes);
        let result = self.run_episodes();
        let closed = self.environment.close();

        let summary = result?;
        closed?;
        Ok(summary)
    }

    fn run_episodes(&mut self) -> Result<TrainingSummary> {
        let mut interrupted = false;
        while self.episode_count < self.param.episodes {
            let summary = self.learn_episode()?;
            if !summary.completed {
                interrupted = true;
                break;
            }
            if self.param.checkpoint_after_episodes > 0
                && self.episode_count % self.param.checkpoint_after_episodes == 0
                && self.episode_count < self.param.episodes
            {
                self.agent.persist(&self.param.model_path)?;
            }
        }

        if interrupted {
            log::warn!("training interrupted in episode {}", self.episode_count + 1);
        }
        self.agent.persist(&self.param.model_path)?;

        Ok(TrainingSummary {
            episodes: self.episode_count,
            steps: self.step_count,
            running_reward: self.running_reward(),
            interrupted,
        })
    }

    /// Plays one episode until the environment reports a terminal state
    pub fn learn_episode(&mut self) -> Result<EpisodeSummary> {
        let epsilon = self.epsilon.value();
        let mut state = self.environment.reset()?;
        log::trace!("started learning episode {}", self.episode_count + 1);

        let mut episode_reward = 0.0;
        let mut steps = 0;
        let mut completed = false;

        while !self.stop_requested() {
            let action = self.agent.select_action(&state, epsilon)?;
            let (state_next, reward, done) = self.environment.step(action)?;
            log::trace!("step with action {} resulted in reward: {:.2}, done: {}", action, reward, done);

            self.agent.record(state, action, reward, Rc::clone(&state_next), done);
            if let Some(loss) = self.agent.learn()? {
                log::trace!("training loss: {:.4}", loss);
            }

            episode_reward += reward;
            steps += 1;
            self.step_count += 1;
            state = state_next;

            if done {
                completed = true;
                break;
            }
        }

        let summary = EpisodeSummary {
            episode: self.episode_count + 1,
            steps,
            reward: episode_reward,
            epsilon,
            completed,
        };
        if !completed {
            return Ok(summary);
        }

        self.agent.sync_target();
        self.epsilon.decay();
        self.episode_rewards.add(episode_reward);
        self.episode_count += 1;

        log::info!(
            "episode {}/{}, reward: {:.1}, 𝜀={:.3}, running_reward: {:.1}, steps: {}",
            self.episode_count,
            self.param.episodes,
            episode_reward,
            self.epsilon.value(),
            self.running_reward().unwrap_or(episode_reward),
            steps
        );
        if self.param.stats_after_episodes > 0 && self.episode_count % self.param.stats_after_episodes == 0 {
            self.learning_update_log();
        }

        Ok(summary)
    }

    fn learning_update_log(&self) {
        let number_format = format::number_format();

        let mut action_counts = FxHashMap::<usize, usize>::default();
        for transition in self.agent.replay_buffer().iter() {
            *action_counts.entry(transition.action).or_insert(0) += 1;
        }
        let total_actions = self.agent.replay_buffer().len();
        let action_distribution_line = action_counts
            .iter()
            .sorted()
            .map(|(&action, &count)| format!("{}: {:.1}%", action, 100.0 * count as f32 / total_actions as f32))
            .join(", ");

        log::info!(
            "\n\
    episode: {}, steps: {}, train_steps: {}, 𝜀={:.3}, rewards: {{mean: {:.1}, low: {:.1}}}\n\
    action_distribution (of last {}): {}",
            self.episode_count.to_formatted_string(&number_format),
            self.step_count.to_formatted_string(&number_format),
            self.agent.train_steps().to_formatted_string(&number_format),
            self.epsilon.value(),
            self.episode_rewards.mean().unwrap_or_default(),
            self.episode_rewards.min().unwrap_or_default(),
            total_actions.to_formatted_string(&number_format),
            action_distribution_line
        );
    }
}
