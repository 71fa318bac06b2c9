use std::fs;
use std::marker::PhantomData;
use std::path::Path;

use anyhow::{anyhow, ensure, Result};
use burn::module::AutodiffModule;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::{MseLoss, Reduction};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;

use crate::ml_model::model::{ModelInput, QValueModel};
use crate::prelude::QlError;

/// Input shape and output size of the convolutional action-value network
#[derive(Config, Debug)]
pub struct QNetworkConfig {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub action_space: usize,
    #[config(default = 512)]
    pub hidden_size: usize,
}

/// (kernel, stride) of the three convolution layers
const CONV_LAYERS: [(usize, usize); 3] = [(8, 4), (4, 2), (3, 1)];

impl QNetworkConfig {
    /// Height and width of the last convolution's output or `None` if the input is too small for the kernels
    pub fn feature_map_size(&self) -> Option<(usize, usize)> {
        let shrink = |len: usize| {
            CONV_LAYERS
                .iter()
                .try_fold(len, |len, &(kernel, stride)| len.checked_sub(kernel).map(|l| l / stride + 1))
        };
        Some((shrink(self.height)?, shrink(self.width)?))
    }

    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<QNetwork<B>> {
        let (feature_height, feature_width) = self.feature_map_size().ok_or_else(|| {
            anyhow!("input of {}x{} pixels is too small for the convolution layers", self.height, self.width)
        })?;
        ensure!(self.action_space > 0, "action space must not be empty");

        let [(k1, s1), (k2, s2), (k3, s3)] = CONV_LAYERS;
        Ok(QNetwork {
            conv1: Conv2dConfig::new([self.channels, 32], [k1, k1]).with_stride([s1, s1]).init(device),
            conv2: Conv2dConfig::new([32, 64], [k2, k2]).with_stride([s2, s2]).init(device),
            conv3: Conv2dConfig::new([64, 64], [k3, k3]).with_stride([s3, s3]).init(device),
            hidden: LinearConfig::new(64 * feature_height * feature_width, self.hidden_size).init(device),
            output: LinearConfig::new(self.hidden_size, self.action_space).init(device),
            activation: Relu::new(),
        })
    }
}

/// Three convolutions followed by two dense layers; linear output with one value per action
#[derive(Module, Debug)]
pub struct QNetwork<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    hidden: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> QNetwork<B> {
    /// `input` [batch, channels, height, width] => [batch, action_space]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(input));
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.activation.forward(self.conv3.forward(x));
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = self.activation.forward(self.hidden.forward(x));
        self.output.forward(x)
    }
}

/// [QValueModel] backed by a [QNetwork], trained with the optimizer `O`
pub struct BurnQModel<B, S, O>
where
    B: AutodiffBackend,
{
    network: QNetwork<B>,
    optimizer: O,
    learning_rate: f64,
    config: QNetworkConfig,
    device: B::Device,
    _state: PhantomData<fn(&S)>,
}

/// Creates a freshly initialized model using the Adam optimizer
pub fn adam_q_model<B, S>(
    config: &QNetworkConfig,
    learning_rate: f64,
    device: &B::Device,
) -> Result<BurnQModel<B, S, impl Optimizer<QNetwork<B>, B>>>
where
    B: AutodiffBackend,
    S: ModelInput,
{
    Ok(BurnQModel {
        network: config.init(device)?,
        optimizer: AdamConfig::new().init(),
        learning_rate,
        config: config.clone(),
        device: device.clone(),
        _state: PhantomData,
    })
}

impl<B, S, O> BurnQModel<B, S, O>
where
    B: AutodiffBackend,
    S: ModelInput,
    O: Optimizer<QNetwork<B>, B>,
{
    fn input_tensor<BB: Backend<Device = B::Device>>(
        &self,
        states: &[&S],
    ) -> Result<Tensor<BB, 4>> {
        ensure!(!states.is_empty(), "empty state batch");
        let dims = [self.config.channels, self.config.height, self.config.width];
        let mut features = Vec::with_capacity(states.len() * dims.iter().product::<usize>());
        for state in states {
            ensure!(state.dims() == dims, "state dimension mismatch. Expected {:?}, got {:?}", dims, state.dims());
            state.write_features(&mut features);
        }
        let [channels, height, width] = dims;
        Ok(Tensor::<BB, 1>::from_floats(features.as_slice(), &self.device).reshape([
            states.len(),
            channels,
            height,
            width,
        ]))
    }

    fn rows(
        values: Tensor<B::InnerBackend, 2>,
        action_space: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let flat = values
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| QlError::model(format!("{:?}", e)))?;
        Ok(flat.chunks(action_space).map(<[f32]>::to_vec).collect())
    }
}

impl<B, S, O> QValueModel for BurnQModel<B, S, O>
where
    B: AutodiffBackend,
    S: ModelInput,
    O: Optimizer<QNetwork<B>, B>,
{
    type S = S;
    type Snapshot = QNetwork<B>;

    fn action_space(&self) -> usize { self.config.action_space }

    fn predict(
        &self,
        state: &S,
    ) -> Result<Vec<f32>> {
        self.batch_predict(&[state])?
            .pop()
            .ok_or_else(|| QlError::model("no prediction produced").into())
    }

    fn batch_predict(
        &self,
        states: &[&S],
    ) -> Result<Vec<Vec<f32>>> {
        let input = self.input_tensor::<B::InnerBackend>(states)?;
        let values = self.network.valid().forward(input);
        Self::rows(values, self.config.action_space)
    }

    fn train(
        &mut self,
        states: &[&S],
        targets: &[Vec<f32>],
    ) -> Result<f32> {
        let action_space = self.config.action_space;
        ensure!(states.len() == targets.len(), "got {} states but {} target vectors", states.len(), targets.len());
        ensure!(targets.iter().all(|t| t.len() == action_space), "target vectors must have {} values", action_space);

        let input = self.input_tensor::<B>(states)?;
        let flat_targets = targets.iter().flatten().copied().collect::<Vec<f32>>();
        let targets = Tensor::<B, 1>::from_floats(flat_targets.as_slice(), &self.device).reshape([states.len(), action_space]);

        let q_values = self.network.forward(input);
        let loss = MseLoss::new().forward(q_values, targets, Reduction::Mean);

        let grads = GradientsParams::from_grads(loss.backward(), &self.network);
        self.network = self.optimizer.step(self.learning_rate, self.network.clone(), grads);

        let loss = loss
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| QlError::model(format!("{:?}", e)))?;
        loss.first().copied().ok_or_else(|| QlError::model("empty loss").into())
    }

    fn snapshot(&self) -> QNetwork<B> { self.network.clone() }

    fn restore(
        &mut self,
        snapshot: QNetwork<B>,
    ) {
        self.network = snapshot;
    }

    /// Writes the parameters to `path` (the recorder appends the `.mpk` extension)
    fn save(
        &self,
        path: &Path,
    ) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.network
            .clone()
            .save_file(path, &recorder)
            .map_err(|e| QlError::model(format!("failed to save model to '{}': {:?}", path.display(), e)))?;
        log::info!("saved model to '{}'", path.display());
        Ok(())
    }

    fn load(
        &mut self,
        path: &Path,
    ) -> Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.network = self
            .network
            .clone()
            .load_file(path, &recorder, &self.device)
            .map_err(|e| QlError::model(format!("failed to load model from '{}': {:?}", path.display(), e)))?;
        log::info!("loaded model from '{}'", path.display());
        Ok(())
    }
}
