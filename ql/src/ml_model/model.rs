use std::path::Path;

use anyhow::Result;

/// Capability to produce the flat feature vector of a state, as it is fed into a model.
pub trait ModelInput {
    /// Dimensions of the produced features: `[channels, height, width]`
    fn dims(&self) -> [usize; 3];

    /// Appends `channels * height * width` values (channel-major, then row-major) to `out`
    fn write_features(
        &self,
        out: &mut Vec<f32>,
    );
}

/// 'Physical' AI model abstraction: an action-value function approximator
pub trait QValueModel {
    type S;
    /// Copy of all trainable parameters
    type Snapshot;

    /// Length of the produced action-value vectors
    fn action_space(&self) -> usize;

    /// Action-values for a single state
    fn predict(
        &self,
        state: &Self::S,
    ) -> Result<Vec<f32>>;

    fn batch_predict(
        &self,
        states: &[&Self::S],
    ) -> Result<Vec<Vec<f32>>>;

    /// Performs a single gradient step (mean squared error) towards `targets`.
    ///
    /// # Arguments
    /// * `states` batch of states
    /// * `targets` one complete action-value vector per state
    ///
    /// # Returns
    ///   calculated loss
    fn train(
        &mut self,
        states: &[&Self::S],
        targets: &[Vec<f32>],
    ) -> Result<f32>;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(
        &mut self,
        snapshot: Self::Snapshot,
    );

    fn save(
        &self,
        path: &Path,
    ) -> Result<()>;

    fn load(
        &mut self,
        path: &Path,
    ) -> Result<()>;
}
