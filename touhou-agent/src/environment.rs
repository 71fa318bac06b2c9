use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use ql::prelude::{ActionIndex, Environment};

use crate::action_mapper::{ActionCatalog, ActionMapper, FocusKeeper, InputState};
use crate::capture::{Observation, ObservationCapture};
use crate::config::Config;
use crate::device::{Clock, InputDevice, PixelSource, WindowFocus};
use crate::perception::{Perception, PerceptionResult};
use crate::recovery::RecoveryScript;
use crate::reward::{RewardBreakdown, RewardStrategy};
use crate::templates::ReferenceImages;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    Running,
    Terminal,
    Recovering,
}

impl Display for EpisodeState {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The outside world the environment talks to
pub struct Devices {
    pub pixels: Box<dyn PixelSource>,
    pub input: Box<dyn InputDevice>,
    pub focus: Box<dyn WindowFocus>,
    pub clock: Rc<dyn Clock>,
}

/// Everything one step produced
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: Rc<Observation>,
    pub reward: RewardBreakdown,
    pub perception: PerceptionResult,
}

/// The running game as a learning [Environment]: screen in, keys out
pub struct TouhouEnvironment {
    capture: ObservationCapture,
    mapper: ActionMapper,
    perception: Perception,
    reward: RewardStrategy,
    recovery: RecoveryScript,
    clock: Rc<dyn Clock>,
    action_repeats: usize,
    repeat_pause: Duration,
    state: EpisodeState,
    episode: usize,
}

impl TouhouEnvironment {
    /// Presses the always-on key; the environment starts in [EpisodeState::Running]
    pub fn new(
        config: &Config,
        references: &ReferenceImages,
        devices: Devices,
    ) -> Result<Self> {
        let (width, height) = config.observation_size;
        let mapper = ActionMapper::new(
            ActionCatalog::new(config.actions.clone(), config.always_on),
            devices.input,
            FocusKeeper::new(devices.focus, config.window_title.clone(), config.timing.focus_settle),
            Rc::clone(&devices.clock),
            config.timing.frame_interval,
        )?;

        Ok(Self {
            capture: ObservationCapture::new(devices.pixels, config.screen_region, width, height),
            mapper,
            perception: Perception::new(config.perception.clone(), references, (width, height)),
            reward: config.reward.clone(),
            recovery: RecoveryScript::new(&config.recovery),
            clock: devices.clock,
            action_repeats: config.timing.action_repeats,
            repeat_pause: config.timing.repeat_pause,
            state: EpisodeState::Running,
            episode: 1,
        })
    }

    pub fn episode_state(&self) -> EpisodeState { self.state }

    /// Number of the current episode, starting with 1
    pub fn episode(&self) -> usize { self.episode }

    pub fn input_state(&self) -> &InputState { self.mapper.state() }

    /// [Environment::step] with all details
    pub fn step_observed(
        &mut self,
        action: ActionIndex,
    ) -> Result<StepOutcome> {
        debug_assert_eq!(self.state, EpisodeState::Running);

        self.mapper.apply(action)?;
        for _ in 0..self.action_repeats {
            self.clock.sleep(self.repeat_pause);
            self.mapper.apply(action)?;
        }

        let prev = self.capture.capture()?;
        let next = self.capture.capture()?;
        let perception = self.perception.perceive(&prev, &next, self.reward.needs_shaping_cues());
        let reward = self.reward.reward(&perception);
        log::debug!(
            "action {} ({}), reward {}, game-over score {:.3}",
            action,
            self.mapper.catalog().describe(action),
            reward,
            perception.game_over_score
        );

        if perception.terminal {
            self.transition(EpisodeState::Terminal);
            self.transition(EpisodeState::Recovering);
            self.recovery.run(&mut self.mapper)?;
            self.episode += 1;
            self.transition(EpisodeState::Running);
        }

        Ok(StepOutcome { observation: Rc::new(next), reward, perception })
    }

    fn transition(
        &mut self,
        to: EpisodeState,
    ) {
        log::debug!("episode {}: {} -> {}", self.episode, self.state, to);
        self.state = to;
    }
}

impl Environment for TouhouEnvironment {
    type S = Observation;

    fn action_space(&self) -> usize { self.mapper.action_space() }

    fn reset(&mut self) -> Result<Rc<Observation>> { Ok(Rc::new(self.capture.capture()?)) }

    fn step(
        &mut self,
        action: ActionIndex,
    ) -> Result<(Rc<Observation>, f32, bool)> {
        let outcome = self.step_observed(action)?;
        Ok((outcome.observation, outcome.reward.total, outcome.perception.terminal))
    }

    fn close(&mut self) -> Result<()> {
        log::info!("releasing all keys");
        self.mapper.full_release()
    }
}
