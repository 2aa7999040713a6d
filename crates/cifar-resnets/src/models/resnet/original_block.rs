//! # Original (Post-Activation) Block for `ResNet`
//!
//! [`OriginalBlock`] is the residual unit of the original `ResNet` paper:
//!
//! ```text,ignore
//! c1  = conv3x3(planes, stride)(x)
//! c2  = bn(conv3x3(planes)(bn_relu(c1)))
//! out = relu(shortcut(x) + c2)
//! ```
//!
//! [`OriginalBlockConfig`] implements [`Config`], and provides
//! [`OriginalBlockConfig::init`] to initialize an [`OriginalBlock`].

use crate::layers::blocks::bn_relu::{BnRelu, BnReluConfig, batch_norm_config};
use crate::layers::blocks::conv::{kernel_l2, padded_conv2d_config};
use crate::models::resnet::residual_block::ResidualBlockMeta;
use crate::models::resnet::shortcut::{Shortcut, ShortcutConfig, ShortcutType, apply_shortcut};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`OriginalBlock`] Config.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Config, Debug)]
pub struct OriginalBlockConfig {
    /// The number of input planes.
    pub in_planes: usize,

    /// The number of output planes.
    pub planes: usize,

    /// The stride of the first conv.
    #[config(default = 1)]
    pub stride: usize,

    /// The shortcut alignment strategy.
    #[config(default = "ShortcutType::Projection")]
    pub shortcut_type: ShortcutType,
}

impl ResidualBlockMeta for OriginalBlockConfig {
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

impl OriginalBlockConfig {
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
        self.shortcut().try_validate()
    }

    /// Initialize an [`OriginalBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> OriginalBlock<B> {
        OriginalBlock {
            conv1: padded_conv2d_config([self.in_planes, self.planes], 3, self.stride).init(device),
            bn_relu1: BnReluConfig::new(self.planes).init(device),
            conv2: padded_conv2d_config([self.planes, self.planes], 3, 1).init(device),
            norm2: batch_norm_config(self.planes).init(device),
            shortcut: self.shortcut().init(device),
            act: Relu::new(),
        }
    }
}

/// Original (post-activation) `ResNet` block.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Module, Debug)]
pub struct OriginalBlock<B: Backend> {
    /// First conv; carries the stride.
    pub conv1: Conv2d<B>,
    /// First norm / activation.
    pub bn_relu1: BnRelu<B>,
    /// Second conv.
    pub conv2: Conv2d<B>,
    /// Second norm; activation follows the residual sum.
    pub norm2: BatchNorm<B, 2>,

    /// Optional shortcut alignment; `None` is the identity.
    pub shortcut: Option<Shortcut<B>>,

    /// Output activation.
    pub act: Relu,
}

impl<B: Backend> ResidualBlockMeta for OriginalBlock<B> {
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

impl<B: Backend> OriginalBlock<B> {
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

        let identity = apply_shortcut(&self.shortcut, input.clone());

        let x = self.conv1.forward(input);
        let x = self.bn_relu1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.norm2.forward(x);
        let x = self.act.forward(x + identity);

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
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_original_block_config() {
        let config = OriginalBlockConfig::new(16, 32).with_stride(2);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.main_path_depth(), 2);
        assert_eq!(config.output_resolution([32, 32]), [16, 16]);
        assert!(config.try_validate().is_ok());
        assert!(!config.shortcut().is_identity());
    }

    #[test]
    fn test_original_block_identity() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: OriginalBlock<B> = OriginalBlockConfig::new(4, 4).init(&device);
        assert!(block.shortcut.is_none());
        assert_eq!(block.in_planes(), 4);
        assert_eq!(block.out_planes(), 4);
        assert_eq!(block.stride(), 1);
        assert_eq!(block.norm2.epsilon, crate::layers::blocks::bn_relu::BN_EPSILON);
        assert_eq!(block.norm2.momentum, crate::layers::blocks::bn_relu::BN_MOMENTUM);

        let input = Tensor::random([2, 4, 6, 6], Distribution::Default, &device);
        let output = block.forward(input.clone());

        let expected = {
            let x = block.conv1.forward(input.clone());
            let x = block.bn_relu1.forward(x);
            let x = block.conv2.forward(x);
            let x = block.norm2.forward(x);
            block.act.forward(x + input)
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_original_block_downsample() {
        type B = NdArray<f32>;
        let device = Default::default();

        for shortcut_type in [ShortcutType::Padding, ShortcutType::Projection] {
            let block: OriginalBlock<B> = OriginalBlockConfig::new(2, 4)
                .with_stride(2)
                .with_shortcut_type(shortcut_type)
                .init(&device);
            assert!(block.shortcut.is_some());

            let input = Tensor::ones([2, 2, 8, 8], &device);
            let output = block.forward(input);

            assert_eq!(output.dims(), [2, 4, 4, 4]);

            let min: f32 = output.min().into_scalar();
            assert!(min >= 0.0);
        }
    }
}
