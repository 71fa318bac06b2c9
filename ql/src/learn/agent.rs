use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::learn::replay_buffer::{ReplayBuffer, Transition};
use crate::ml_model::model::QValueModel;
use crate::prelude::{ActionIndex, QlError};
use crate::util::immutable::Immutable;

#[derive(Debug, Clone)]
pub struct AgentParameter {
    /// Discount rate; (0 <= 𝛾 <= 1) represents the value of future rewards. The bigger, the more farsighted the agent becomes
    pub gamma: f32,
    /// Number of transitions per training step
    pub batch_size: usize,
    /// Maximum replay length
    pub replay_buffer_len: usize,
}

impl Default for AgentParameter {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            batch_size: 32,
            replay_buffer_len: 2000,
        }
    }
}

/// Deep-Q-Learning agent: epsilon-greedy policy, experience replay and a stabilized target model
pub struct DqnAgent<M: QValueModel> {
    param: Immutable<AgentParameter>,
    rng: StdRng,
    model: M,
    // "target model"
    stabilized_model: M,
    replay_buffer: ReplayBuffer<Transition<M::S>>,
    train_steps: usize,
}

impl<M: QValueModel> DqnAgent<M> {
    /// Creates both models with `init_model`; the stabilized one starts as an exact copy of the other
    pub fn new(
        param: AgentParameter,
        init_model: impl Fn() -> Result<M>,
    ) -> Result<Self> {
        Self::with_rng(param, init_model, StdRng::from_entropy())
    }

    pub fn with_rng(
        param: AgentParameter,
        init_model: impl Fn() -> Result<M>,
        rng: StdRng,
    ) -> Result<Self> {
        assert!(param.batch_size > 0);
        assert!(param.replay_buffer_len >= param.batch_size);
        let model = init_model()?;
        let mut stabilized_model = init_model()?;
        stabilized_model.restore(model.snapshot());

        Ok(Self {
            replay_buffer: ReplayBuffer::new(param.replay_buffer_len),
            param: Immutable::new(param),
            rng,
            model,
            stabilized_model,
            train_steps: 0,
        })
    }

    pub fn action_space(&self) -> usize { self.model.action_space() }

    pub fn replay_buffer(&self) -> &ReplayBuffer<Transition<M::S>> { &self.replay_buffer }

    pub fn train_steps(&self) -> usize { self.train_steps }

    pub fn model(&self) -> &M { &self.model }

    pub fn stabilized_model(&self) -> &M { &self.stabilized_model }

    /// Epsilon-greedy: a random action with probability `epsilon`, otherwise the action with the highest predicted value
    pub fn select_action(
        &mut self,
        state: &M::S,
        epsilon: f64,
    ) -> Result<ActionIndex> {
        if epsilon > self.rng.gen_range(0_f64..1_f64) {
            Ok(self.rng.gen_range(0..self.action_space()))
        } else {
            let q_values = self.model.predict(state)?;
            argmax(&q_values).ok_or_else(|| QlError::model("model produced no action values").into())
        }
    }

    pub fn record(
        &mut self,
        state: Rc<M::S>,
        action: ActionIndex,
        reward: f32,
        next_state: Rc<M::S>,
        done: bool,
    ) {
        debug_assert!(action < self.action_space());
        self.replay_buffer.add(Transition { state, action, reward, next_state, done });
    }

    /// One training step on a random batch of the replay buffer.
    /// Returns the loss or `None` as long as the replay buffer holds fewer than `batch_size` transitions.
    pub fn learn(&mut self) -> Result<Option<f32>> {
        let samples = match self.replay_buffer.sample(&mut self.rng, self.param.batch_size) {
            Ok(samples) => samples,
            Err(QlError::InsufficientData { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let states = samples.iter().map(|t| t.state.as_ref()).collect::<Vec<_>>();
        let next_states = samples.iter().map(|t| t.next_state.as_ref()).collect::<Vec<_>>();

        // Use the target model for stability
        let future_rewards = self.stabilized_model.batch_predict(&next_states)?;
        let mut targets = self.model.batch_predict(&states)?;

        for ((transition, target), future) in samples.iter().zip(targets.iter_mut()).zip(future_rewards.iter()) {
            // for terminal steps, the updated q-value shall be exactly the reward
            target[transition.action] = if transition.done {
                transition.reward
            } else {
                // Q value = reward + discount factor * expected future reward
                transition.reward + self.param.gamma * max_value(future)
            };
        }

        let loss = self.model.train(&states, &targets)?;
        self.train_steps += 1;
        Ok(Some(loss))
    }

    /// Copies the parameters of the trained model onto the target model
    pub fn sync_target(&mut self) { self.stabilized_model.restore(self.model.snapshot()); }

    pub fn persist(
        &self,
        path: &Path,
    ) -> Result<()> {
        self.model.save(path)
    }

    /// Continues from a saved model; both models get the loaded parameters
    pub fn resume_from(
        &mut self,
        path: &Path,
    ) -> Result<()> {
        self.model.load(path)?;
        self.sync_target();
        Ok(())
    }
}

/// Index of the first maximum
fn argmax(values: &[f32]) -> Option<ActionIndex> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, best_value)) if best_value >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

fn max_value(values: &[f32]) -> f32 { values.iter().copied().fold(f32::NEG_INFINITY, f32::max) }

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Linear test model: q(s)[a] = weights[a] * s + bias[a]; training just records the targets
    #[derive(Clone)]
    struct LinearModel {
        weights: Vec<f32>,
        bias: Vec<f32>,
        trained_targets: Rc<RefCell<Vec<Vec<Vec<f32>>>>>,
    }

    impl LinearModel {
        fn new(weights: Vec<f32>) -> Self {
            let n = weights.len();
            Self { weights, bias: vec![0.0; n], trained_targets: Default::default() }
        }
    }

    impl QValueModel for LinearModel {
        type S = f32;
        type Snapshot = (Vec<f32>, Vec<f32>);

        fn action_space(&self) -> usize { self.weights.len() }

        fn predict(&self, state: &f32) -> Result<Vec<f32>> {
            Ok(self.weights.iter().zip(&self.bias).map(|(w, b)| w * state + b).collect())
        }

        fn batch_predict(&self, states: &[&f32]) -> Result<Vec<Vec<f32>>> {
            states.iter().map(|s| self.predict(s)).collect()
        }

        fn train(&mut self, _states: &[&f32], targets: &[Vec<f32>]) -> Result<f32> {
            self.trained_targets.borrow_mut().push(targets.to_vec());
            for b in self.bias.iter_mut() {
                *b += 1.0;
            }
            Ok(0.5)
        }

        fn snapshot(&self) -> Self::Snapshot { (self.weights.clone(), self.bias.clone()) }

        fn restore(&mut self, (weights, bias): Self::Snapshot) {
            self.weights = weights;
            self.bias = bias;
        }

        fn save(&self, _path: &Path) -> Result<()> { Ok(()) }

        fn load(&mut self, _path: &Path) -> Result<()> { Ok(()) }
    }

    fn agent(weights: Vec<f32>, param: AgentParameter) -> DqnAgent<LinearModel> {
        DqnAgent::with_rng(param, || Ok(LinearModel::new(weights.clone())), StdRng::seed_from_u64(17)).unwrap()
    }

    #[test]
    fn test_argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax(&[-1.0]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_random_actions_are_uniform() {
        const ACTIONS: usize = 13;
        const TRIALS: usize = 130_000;
        let mut agent = agent(vec![0.0; ACTIONS], AgentParameter::default());
        let mut counts = [0_usize; ACTIONS];
        for _ in 0..TRIALS {
            counts[agent.select_action(&0.0, 1.0).unwrap()] += 1;
        }
        // chi-square goodness of fit, 12 degrees of freedom; p = 0.001 => 32.9
        let expected = (TRIALS / ACTIONS) as f64;
        let chi_square: f64 = counts.iter().map(|&c| (c as f64 - expected).powi(2) / expected).sum();
        assert!(chi_square < 32.9, "chi square {} for counts {:?}", chi_square, counts);
    }

    #[test]
    fn test_greedy_action_is_deterministic() {
        let mut agent = agent(vec![0.5, -1.0, 2.0, 2.0], AgentParameter::default());
        for _ in 0..100 {
            assert_eq!(agent.select_action(&1.0, 0.0).unwrap(), 2);
            assert_eq!(agent.select_action(&-1.0, 0.0).unwrap(), 1);
        }
    }

    #[test]
    fn test_learn_waits_for_batch_size() {
        let param = AgentParameter { gamma: 0.9, batch_size: 4, replay_buffer_len: 10 };
        let mut agent = agent(vec![1.0, 2.0], param);
        for i in 0..3 {
            agent.record(Rc::new(i as f32), 0, 1.0, Rc::new(i as f32 + 1.0), false);
            assert_eq!(agent.learn().unwrap(), None);
        }
        agent.record(Rc::new(3.0), 1, 1.0, Rc::new(4.0), true);
        assert_eq!(agent.learn().unwrap(), Some(0.5));
        assert_eq!(agent.train_steps(), 1);
    }

    #[test]
    fn test_learn_targets() {
        let param = AgentParameter { gamma: 0.5, batch_size: 2, replay_buffer_len: 2 };
        let mut agent = agent(vec![1.0, -1.0, 3.0], param);
        agent.record(Rc::new(1.0), 1, 10.0, Rc::new(2.0), false);
        agent.record(Rc::new(4.0), 2, -100.0, Rc::new(5.0), true);
        agent.learn().unwrap();

        let trained = agent.model().trained_targets.borrow().clone();
        assert_eq!(trained.len(), 1);
        let mut batch = trained[0].clone();
        batch.sort_by(|a, b| a[0].total_cmp(&b[0]));
        // online output for state 1.0 is [1, -1, 3]; target model max for next state 2.0 is 6
        assert_eq!(batch[0], vec![1.0, 10.0 + 0.5 * 6.0, 3.0]);
        // terminal: exactly the reward
        assert_eq!(batch[1], vec![4.0, -4.0, -100.0]);
    }

    #[test]
    fn test_bootstrap_uses_target_model_until_sync() {
        let param = AgentParameter { gamma: 1.0, batch_size: 1, replay_buffer_len: 1 };
        let mut agent = agent(vec![1.0], param);
        agent.record(Rc::new(0.0), 0, 0.0, Rc::new(0.0), false);

        agent.learn().unwrap();
        agent.learn().unwrap();
        // online bias is 2 now, target still 0
        assert_eq!(agent.model().predict(&0.0).unwrap(), vec![2.0]);
        assert_eq!(agent.stabilized_model().predict(&0.0).unwrap(), vec![0.0]);
        assert_eq!(agent.model().trained_targets.borrow()[1], vec![vec![0.0]]);

        agent.sync_target();
        assert_eq!(agent.stabilized_model().predict(&3.0).unwrap(), agent.model().predict(&3.0).unwrap());
        agent.learn().unwrap();
        assert_eq!(agent.model().trained_targets.borrow()[2], vec![vec![2.0]]);
    }
}
