//! # Pre-Activation Block for `ResNet`
//!
//! [`PreActBlock`] is the identity-mapping residual unit:
//!
//! ```text,ignore
//! flow = bn_relu(x)
//! if group_leader: x = flow
//! c1   = dropout(conv3x3(planes, stride)(flow))
//! c2   = conv3x3(planes)(bn_relu(c1))
//! out  = shortcut(x) + c2
//! ```
//!
//! The first block of a group (the group leader) routes the activated
//! input to the shortcut; every other block keeps the raw input.
//!
//! Wide `ResNet` variants place [`Dropout`] between the two convs.

use crate::layers::blocks::bn_relu::{BnRelu, BnReluConfig};
use crate::layers::blocks::conv::{kernel_l2, padded_conv2d_config};
use crate::models::resnet::residual_block::ResidualBlockMeta;
use crate::models::resnet::shortcut::{Shortcut, ShortcutConfig, ShortcutType, apply_shortcut};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::conv::Conv2d;
use burn::nn::{Dropout, DropoutConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`PreActBlock`] Config.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Config, Debug)]
pub struct PreActBlockConfig {
    /// The number of input planes.
    pub in_planes: usize,

    /// The number of output planes.
    pub planes: usize,

    /// The stride of the first conv.
    #[config(default = 1)]
    pub stride: usize,

    /// Is this the first block of a group?
    #[config(default = "false")]
    pub group_leader: bool,

    /// Dropout probability between the convs; `0.0` disables dropout.
    #[config(default = "0.0")]
    pub dropout: f64,

    /// The shortcut alignment strategy.
    #[config(default = "ShortcutType::Projection")]
    pub shortcut_type: ShortcutType,
}

impl ResidualBlockMeta for PreActBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn main_path_depth(&self) -> usize {
        2
    }
}

impl PreActBlockConfig {
    /// The residual shortcut config.
    pub fn shortcut(&self) -> ShortcutConfig {
        ShortcutConfig::new(self.in_planes, self.planes)
            .with_stride(self.stride)
            .with_shortcut_type(self.shortcut_type.clone())
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.planes == 0 {
            return Err("planes must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(format!("dropout must be in [0, 1): {}", self.dropout));
        }
        self.shortcut().try_validate()
    }

    /// Initialize a [`PreActBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PreActBlock<B> {
        PreActBlock {
            group_leader: self.group_leader,
            bn_relu1: BnReluConfig::new(self.in_planes).init(device),
            conv1: padded_conv2d_config([self.in_planes, self.planes], 3, self.stride).init(device),
            dropout: if self.dropout > 0.0 {
                Some(DropoutConfig::new(self.dropout).init())
            } else {
                None
            },
            bn_relu2: BnReluConfig::new(self.planes).init(device),
            conv2: padded_conv2d_config([self.planes, self.planes], 3, 1).init(device),
            shortcut: self.shortcut().init(device),
        }
    }
}

/// Pre-activation `ResNet` block.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Module, Debug)]
pub struct PreActBlock<B: Backend> {
    /// Is this the first block of a group?
    pub group_leader: bool,

    /// Input norm / activation.
    pub bn_relu1: BnRelu<B>,
    /// First conv; carries the stride.
    pub conv1: Conv2d<B>,
    /// Optional dropout after the first conv.
    pub dropout: Option<Dropout>,
    /// Inner norm / activation.
    pub bn_relu2: BnRelu<B>,
    /// Second conv.
    pub conv2: Conv2d<B>,

    /// Optional shortcut alignment; `None` is the identity.
    pub shortcut: Option<Shortcut<B>>,
}

impl<B: Backend> ResidualBlockMeta for PreActBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.weight.shape().dims[1]
    }

    fn out_planes(&self) -> usize {
        self.conv2.weight.shape().dims[0]
    }

    fn stride(&self) -> usize {
        self.conv1.stride[0]
    }

    fn main_path_depth(&self) -> usize {
        2
    }
}

impl<B: Backend> PreActBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, ceil(in_height / stride), ceil(in_width / stride)]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "in_planes", "in_height", "in_width"];
        let [batch, in_height, in_width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let flow = self.bn_relu1.forward(input.clone());
        let residual = if self.group_leader {
            flow.clone()
        } else {
            input
        };

        let x = self.conv1.forward(flow);
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };
        let x = self.bn_relu2.forward(x);
        let x = self.conv2.forward(x);

        let x = apply_shortcut(&self.shortcut, residual) + x;

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "out_planes", "out_height", "out_width"];
            OUTPUT_CONTRACT.assert_shape(
                &x,
                &[
                    ("batch", batch),
                    ("out_planes", self.out_planes()),
                    ("out_height", out_height),
                    ("out_width", out_width)
                ],
            );
        });

        x
    }

    /// Sum of squares of every regularized kernel in the block.
    pub fn kernel_l2(&self) -> Tensor<B, 1> {
        let l2 = kernel_l2(&self.conv1.weight) + kernel_l2(&self.conv2.weight);
        match self.shortcut.as_ref().and_then(|s| s.kernel_l2()) {
            Some(s) => l2 + s,
            None => l2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_preact_block_config() {
        let config = PreActBlockConfig::new(16, 16);
        assert_eq!(config.stride(), 1);
        assert!(!config.group_leader);
        assert!(config.shortcut().is_identity());
        assert!(config.try_validate().is_ok());

        let config = config.with_dropout(1.0);
        assert_eq!(
            config.try_validate(),
            Err("dropout must be in [0, 1): 1".to_string())
        );
    }

    #[test]
    fn test_preact_block_residual_routing() {
        type B = NdArray<f32>;
        let device = Default::default();

        let input: Tensor<B, 4> = Tensor::random([2, 3, 5, 5], Distribution::Default, &device);

        for group_leader in [false, true] {
            let block: PreActBlock<B> = PreActBlockConfig::new(3, 3)
                .with_group_leader(group_leader)
                .init(&device);
            assert!(block.shortcut.is_none());
            assert!(block.dropout.is_none());

            let output = block.forward(input.clone());

            let expected = {
                let flow = block.bn_relu1.forward(input.clone());
                let residual = if group_leader {
                    flow.clone()
                } else {
                    input.clone()
                };
                let x = block.conv1.forward(flow);
                let x = block.bn_relu2.forward(x);
                residual + block.conv2.forward(x)
            };
            output.to_data().assert_eq(&expected.to_data(), true);
        }
    }

    /// Recompute the block without dropout.
    fn deterministic_forward<B: Backend>(
        block: &PreActBlock<B>,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let flow = block.bn_relu1.forward(input.clone());
        let residual = if block.group_leader {
            flow.clone()
        } else {
            input
        };
        let x = block.conv1.forward(flow);
        let x = block.conv2.forward(block.bn_relu2.forward(x));
        apply_shortcut(&block.shortcut, residual) + x
    }

    #[test]
    fn test_preact_block_downsample() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: PreActBlock<B> = PreActBlockConfig::new(2, 8)
            .with_stride(2)
            .with_group_leader(true)
            .init(&device);
        assert!(block.dropout.is_none());
        assert!(matches!(block.shortcut, Some(Shortcut::Projection(_))));
        assert_eq!(block.output_resolution([7, 7]), [4, 4]);

        let output = block.forward(Tensor::ones([2, 2, 7, 7], &device));
        assert_eq!(output.dims(), [2, 8, 4, 4]);
    }

    #[test]
    fn test_preact_block_dropout_training() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: PreActBlock<B> = PreActBlockConfig::new(4, 8)
            .with_stride(2)
            .with_group_leader(true)
            .with_dropout(0.5)
            .init(&device);
        assert!(block.dropout.is_some());

        let input: Tensor<B, 4> = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let output = block.forward(input.clone());
        assert_eq!(output.dims(), [2, 8, 4, 4]);

        let expected = deterministic_forward(&block, input);
        let diff: f32 = (output - expected).abs().sum().into_scalar();
        assert!(diff > 0.0, "dropout was not applied in training");
    }

    #[test]
    fn test_preact_block_dropout_inference() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: PreActBlock<B> = PreActBlockConfig::new(4, 8)
            .with_stride(2)
            .with_group_leader(true)
            .with_dropout(0.5)
            .init(&device);
        assert!(block.dropout.is_some());

        let input: Tensor<B, 4> = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let output = block.forward(input.clone());

        let expected = deterministic_forward(&block, input);
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
