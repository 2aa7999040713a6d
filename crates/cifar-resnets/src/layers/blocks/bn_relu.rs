//! # `BnRelu` Module
//!
//! A [`BnRelu`] module is a [`BatchNorm`] layer followed by a [`Relu`] activation.

use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig, Relu};
use burn::prelude::{Backend, Tensor};

/// Norm epsilon.
pub const BN_EPSILON: f64 = 1e-3;

/// Running statistics momentum; the weight of each new batch.
pub const BN_MOMENTUM: f64 = 0.01;

/// A 2d [`BatchNormConfig`] with [`BN_EPSILON`] and [`BN_MOMENTUM`].
pub fn batch_norm_config(num_features: usize) -> BatchNormConfig {
    BatchNormConfig::new(num_features)
        .with_epsilon(BN_EPSILON)
        .with_momentum(BN_MOMENTUM)
}

/// [`BnRelu`] Config.
#[derive(Config, Debug)]
pub struct BnReluConfig {
    /// Number of normalized features (channels).
    pub num_features: usize,
}

impl BnReluConfig {
    /// Initialize a [`BnRelu`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BnRelu<B> {
        BnRelu {
            norm: batch_norm_config(self.num_features).init(device),
            act: Relu::new(),
        }
    }
}

/// [`BatchNorm`] and [`Relu`] layer.
#[derive(Module, Debug)]
pub struct BnRelu<B: Backend> {
    /// Internal Norm Layer.
    pub norm: BatchNorm<B, 2>,

    /// Activation layer.
    pub act: Relu,
}

impl<B: Backend> BnRelu<B> {
    /// Number of normalized features (channels).
    pub fn num_features(&self) -> usize {
        self.norm.gamma.shape().dims[0]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, features, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, features, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "features", "height", "width"];
        let [batch, height, width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "height", "width"],
            &[("features", self.num_features())],
        );

        let x = self.norm.forward(input);
        let x = self.act.forward(x);

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "features", "height", "width"];
            OUTPUT_CONTRACT.assert_shape(
                &x,
                &[
                    ("batch", batch),
                    ("features", self.num_features()),
                    ("height", height),
                    ("width", width)
                ],
            );
        });

        x
    }
}
