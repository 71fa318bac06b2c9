use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

use ql::learn::agent::{AgentParameter, DqnAgent};
use ql::learn::epsilon::EpsilonSchedule;
use ql::learn::trainer::{Parameter, Trainer};
use ql::ml_model::model::QValueModel;
use ql::prelude::{ActionIndex, Environment};

const CORRIDOR_LEN: usize = 5;
const LEFT: ActionIndex = 0;
const RIGHT: ActionIndex = 1;

/// Ball in a corridor: start on the very left, the goal is the right end.
/// Every step costs 1, reaching the goal earns 10.
#[derive(Default)]
struct CorridorEnvironment {
    position: usize,
    resets: usize,
    closed: usize,
}

impl Environment for CorridorEnvironment {
    type S = usize;

    fn action_space(&self) -> usize { 2 }

    fn reset(&mut self) -> Result<Rc<usize>> {
        self.position = 0;
        self.resets += 1;
        Ok(Rc::new(self.position))
    }

    fn step(
        &mut self,
        action: ActionIndex,
    ) -> Result<(Rc<usize>, f32, bool)> {
        self.position = match action {
            LEFT => self.position.saturating_sub(1),
            _ => self.position + 1,
        };
        let done = self.position == CORRIDOR_LEN - 1;
        let reward = if done { 10.0 } else { -1.0 };
        Ok((Rc::new(self.position), reward, done))
    }

    fn close(&mut self) -> Result<()> {
        self.closed += 1;
        Ok(())
    }
}

/// Q-table, trained by moving each value half way towards its target
#[derive(Clone)]
struct TableModel {
    table: Vec<[f32; 2]>,
}

impl QValueModel for TableModel {
    type S = usize;
    type Snapshot = Vec<[f32; 2]>;

    fn action_space(&self) -> usize { 2 }

    fn predict(
        &self,
        state: &usize,
    ) -> Result<Vec<f32>> {
        Ok(self.table[*state].to_vec())
    }

    fn batch_predict(
        &self,
        states: &[&usize],
    ) -> Result<Vec<Vec<f32>>> {
        states.iter().map(|s| self.predict(s)).collect()
    }

    fn train(
        &mut self,
        states: &[&usize],
        targets: &[Vec<f32>],
    ) -> Result<f32> {
        let mut loss = 0.0;
        for (&&state, target) in states.iter().zip(targets) {
            for (value, t) in self.table[state].iter_mut().zip(target) {
                loss += (t - *value).powi(2);
                *value += 0.5 * (t - *value);
            }
        }
        Ok(loss / (2 * states.len()) as f32)
    }

    fn snapshot(&self) -> Self::Snapshot { self.table.clone() }

    fn restore(
        &mut self,
        snapshot: Self::Snapshot,
    ) {
        self.table = snapshot;
    }

    fn save(
        &self,
        path: &Path,
    ) -> Result<()> {
        fs::write(path, format!("{:?}", self.table))?;
        Ok(())
    }

    fn load(
        &mut self,
        _path: &Path,
    ) -> Result<()> {
        Ok(())
    }
}

fn agent() -> Result<DqnAgent<TableModel>> {
    let param = AgentParameter { gamma: 0.9, batch_size: 8, replay_buffer_len: 500 };
    DqnAgent::with_rng(
        param,
        || Ok(TableModel { table: vec![[0.0; 2]; CORRIDOR_LEN] }),
        StdRng::seed_from_u64(2024),
    )
}

fn parameter(
    episodes: usize,
    model_path: &Path,
) -> Parameter {
    Parameter {
        episodes,
        epsilon: EpsilonSchedule { start: 1.0, min: 0.05, decay: 0.97 },
        episode_reward_history_buffer_len: 20,
        stats_after_episodes: 50,
        checkpoint_after_episodes: 0,
        model_path: model_path.to_path_buf(),
    }
}

#[test]
fn test_learn_corridor() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model_path = dir.path().join("corridor_model");

    let mut trainer = Trainer::new(CorridorEnvironment::default(), agent()?, parameter(200, &model_path));
    let summary = trainer.run()?;

    assert_eq!(summary.episodes, 200);
    assert!(!summary.interrupted);
    assert!(summary.steps >= 200 * (CORRIDOR_LEN - 1));
    assert_eq!(trainer.environment().resets, 200);
    assert_eq!(trainer.environment().closed, 1);
    assert!(model_path.exists());
    assert_eq!(trainer.epsilon(), f64::max(0.05, 0.97_f64.powi(200)));

    // greedy policy walks straight to the goal
    for position in 0..CORRIDOR_LEN - 1 {
        let q = trainer.agent().model().predict(&position)?;
        assert!(q[RIGHT] > q[LEFT], "position {}: {:?}", position, q);
    }
    // the best possible episode: 3 steps at -1, then +10
    assert!(summary.running_reward.unwrap() > 0.0);
    Ok(())
}

#[test]
fn test_stop_signal_interrupts_and_cleans_up() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model_path = dir.path().join("interrupted_model");
    let stop = Arc::new(AtomicBool::new(true));

    let mut trainer = Trainer::new(CorridorEnvironment::default(), agent()?, parameter(10, &model_path))
        .with_stop_signal(Arc::clone(&stop));
    let summary = trainer.run()?;

    assert!(summary.interrupted);
    assert_eq!(summary.episodes, 0);
    assert_eq!(summary.steps, 0);
    assert_eq!(trainer.environment().closed, 1);
    assert!(model_path.exists());
    assert_eq!(trainer.epsilon(), 1.0);
    Ok(())
}
