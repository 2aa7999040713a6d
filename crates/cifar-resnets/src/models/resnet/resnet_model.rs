//! # `ResNet` Core Model
//!
//! [`ResNet`] is the CIFAR `ResNet` network module.
//!
//! [`ResNetConfig`] implements [`Config`], and is the network assembler:
//! 1. a stem conv ([`FirstConvConfig`]),
//! 2. (original blocks only) a stem ``bn_relu``,
//! 3. one [`BlockGroup`] per zipped ``(group_size, feature, stride)``,
//! 4. (pre-activation blocks only) a head ``bn_relu``,
//! 5. global average pooling and a dense classifier.
//!
//! [`ResNet::regularization_loss`] provides the L2 kernel penalty.

use crate::layers::blocks::bn_relu::{BnRelu, BnReluConfig};
use crate::layers::blocks::conv::{kernel_l2, padded_conv2d_config, same_output_resolution};
use crate::models::resnet::block_group::{BlockGroup, BlockGroupConfig, BlockGroupMeta};
use crate::models::resnet::residual_block::{BlockOptions, BlockType};
use crate::models::resnet::shortcut::ShortcutType;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::{Backend, Config, Tensor};

/// Stem convolution settings.
#[derive(Config, Debug)]
pub struct FirstConvConfig {
    /// Output planes of the stem.
    #[config(default = 16)]
    pub filters: usize,

    /// Odd, square kernel size.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// Stem stride.
    #[config(default = 1)]
    pub stride: usize,
}

impl Default for FirstConvConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ResNet`] Config.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Input image shape: ``[channels, height, width]``.
    pub input_shape: [usize; 3],

    /// Number of classification classes.
    pub num_classes: usize,

    /// L2 kernel regularization factor.
    #[config(default = "0.5e-4")]
    pub l2_reg: f64,

    /// Blocks per group.
    #[config(default = "vec![2, 2, 2]")]
    pub group_sizes: Vec<usize>,

    /// Output planes per group.
    #[config(default = "vec![16, 32, 64]")]
    pub features: Vec<usize>,

    /// Leader stride per group.
    #[config(default = "vec![1, 2, 2]")]
    pub strides: Vec<usize>,

    /// The shortcut alignment strategy.
    #[config(default = "ShortcutType::Projection")]
    pub shortcut_type: ShortcutType,

    /// The residual unit kind.
    #[config(default = "BlockType::PreActivated")]
    pub block_type: BlockType,

    /// The stem convolution.
    #[config(default = "FirstConvConfig::new()")]
    pub first_conv: FirstConvConfig,

    /// Dropout between the convs of pre-activation blocks.
    #[config(default = "0.0")]
    pub dropout: f64,

    /// Groups of the 3x3 conv in bottleneck blocks.
    #[config(default = 1)]
    pub cardinality: usize,

    /// Ratio of planes to inner width in bottleneck blocks.
    #[config(default = 4)]
    pub bottleneck_width: usize,
}

impl ResNetConfig {
    /// The network-wide block settings.
    pub fn block_options(&self) -> BlockOptions {
        BlockOptions::new()
            .with_shortcut_type(self.shortcut_type.clone())
            .with_dropout(self.dropout)
            .with_cardinality(self.cardinality)
            .with_bottleneck_width(self.bottleneck_width)
    }

    /// The number of block groups.
    ///
    /// The group lists are zipped; extra entries in longer lists are ignored.
    pub fn num_groups(&self) -> usize {
        self.group_sizes
            .len()
            .min(self.features.len())
            .min(self.strides.len())
    }

    /// Build the block group configs.
    pub fn group_configs(&self) -> Vec<BlockGroupConfig> {
        let options = self.block_options();
        let mut in_planes = self.first_conv.filters;

        self.group_sizes
            .iter()
            .zip(self.features.iter())
            .zip(self.strides.iter())
            .map(|((&size, &planes), &stride)| {
                let group = BlockGroupConfig::build(
                    &self.block_type,
                    size,
                    in_planes,
                    planes,
                    stride,
                    &options,
                );
                in_planes = planes;
                group
            })
            .collect()
    }

    /// The number of planes entering the classifier head.
    pub fn head_planes(&self) -> usize {
        match self.features[..self.num_groups()].last() {
            Some(&planes) => planes,
            None => self.first_conv.filters,
        }
    }

    /// Total number of residual blocks.
    pub fn num_blocks(&self) -> usize {
        self.group_sizes[..self.num_groups()].iter().sum()
    }

    /// The weighted layer count: stem conv + main-path convs + dense.
    ///
    /// This is the `N` of `ResNet-N`; shortcut projections are not counted.
    pub fn weighted_depth(&self) -> usize {
        let per_block = match self.block_type {
            BlockType::Bottleneck => 3,
            _ => 2,
        };
        2 + per_block * self.num_blocks()
    }

    /// The resolution of the final feature map, before pooling.
    ///
    /// # Panics
    ///
    /// If the config is invalid; a zero stride has no output resolution.
    pub fn output_resolution(&self) -> [usize; 2] {
        self.expect_valid();

        let [_, height, width] = self.input_shape;
        let res = same_output_resolution([height, width], self.first_conv.stride);
        self.strides[..self.num_groups()]
            .iter()
            .fold(res, |res, &stride| same_output_resolution(res, stride))
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.input_shape.contains(&0) {
            return Err(format!("input_shape has a zero dim: {:?}", self.input_shape));
        }
        if self.num_classes == 0 {
            return Err("num_classes must be > 0".to_string());
        }
        if !self.l2_reg.is_finite() || self.l2_reg < 0.0 {
            return Err(format!("l2_reg must be finite and >= 0: {}", self.l2_reg));
        }
        if self.first_conv.filters == 0 || self.first_conv.stride == 0 {
            return Err(format!("invalid first_conv: {:?}", self.first_conv));
        }
        if self.first_conv.kernel_size % 2 == 0 {
            return Err(format!(
                "first_conv.kernel_size must be odd: {}",
                self.first_conv.kernel_size
            ));
        }
        if self.num_groups() == 0 {
            return Err("no block groups: group_sizes, features and strides must be non-empty"
                .to_string());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(format!("dropout must be in [0, 1): {}", self.dropout));
        }
        for (idx, group) in self.group_configs().iter().enumerate() {
            group
                .try_validate()
                .map_err(|err| format!("group[{idx}]: {err}"))?;
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        match self.try_validate() {
            Ok(_) => (),
            Err(err) => panic!("{}", err),
        }
    }

    /// Initialize a [`ResNet`] model.
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    #[tracing::instrument(skip_all)]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        self.expect_valid();

        tracing::debug!(
            block_type = self.block_type.name(),
            shortcut_type = self.shortcut_type.name(),
            depth = self.weighted_depth(),
            groups = ?self.group_sizes,
            features = ?self.features,
            "initializing ResNet"
        );

        let stem_planes = self.first_conv.filters;
        let is_original = self.block_type == BlockType::Original;

        ResNet {
            stem: padded_conv2d_config(
                [self.input_shape[0], stem_planes],
                self.first_conv.kernel_size,
                self.first_conv.stride,
            )
            .init(device),
            stem_bn_relu: if is_original {
                Some(BnReluConfig::new(stem_planes).init(device))
            } else {
                None
            },

            groups: self
                .group_configs()
                .iter()
                .map(|group| group.init(device))
                .collect(),

            head_bn_relu: if is_original {
                None
            } else {
                Some(BnReluConfig::new(self.head_planes()).init(device))
            },
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(self.head_planes(), self.num_classes)
                .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                .init(device),

            input_height: self.input_shape[1],
            input_width: self.input_shape[2],
            l2_reg: self.l2_reg,
        }
    }
}

/// CIFAR `ResNet` model.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Stem conv.
    pub stem: Conv2d<B>,
    /// Stem norm / activation; original blocks only.
    pub stem_bn_relu: Option<BnRelu<B>>,

    /// Block groups.
    pub groups: Vec<BlockGroup<B>>,

    /// Head norm / activation; pre-activation blocks only.
    pub head_bn_relu: Option<BnRelu<B>>,
    /// Global average pooling.
    pub pool: AdaptiveAvgPool2d,
    /// Classifier.
    pub fc: Linear<B>,

    /// Expected input height.
    pub input_height: usize,
    /// Expected input width.
    pub input_width: usize,
    /// L2 kernel regularization factor.
    pub l2_reg: f64,
}

impl<B: Backend> ResNet<B> {
    /// The number of input channels.
    pub fn in_channels(&self) -> usize {
        self.stem.weight.shape().dims[1]
    }

    /// The number of output classes.
    pub fn num_classes(&self) -> usize {
        self.fc.weight.shape().dims[1]
    }

    /// The number of planes entering the classifier head.
    pub fn head_planes(&self) -> usize {
        self.fc.weight.shape().dims[0]
    }

    /// The number of block groups.
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Total number of residual blocks.
    pub fn num_blocks(&self) -> usize {
        self.groups.iter().map(|g| g.len()).sum()
    }

    /// The weighted layer count: stem conv + main-path convs + dense.
    pub fn weighted_depth(&self) -> usize {
        2 + self
            .groups
            .iter()
            .map(|g| g.main_path_depth())
            .sum::<usize>()
    }

    /// The resolution of the final feature map, before pooling.
    pub fn output_resolution(&self) -> [usize; 2] {
        let res = same_output_resolution(
            [self.input_height, self.input_width],
            self.stem.stride[0],
        );
        self.groups
            .iter()
            .fold(res, |res, group| group.output_resolution(res))
    }

    /// `ResNet` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "channels", "height", "width"];
        let [batch] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch"],
            &[
                ("channels", self.in_channels()),
                ("height", self.input_height),
                ("width", self.input_width)
            ],
        );

        // Stem
        let x = self.stem.forward(input);
        let x = match &self.stem_bn_relu {
            Some(bn_relu) => bn_relu.forward(x),
            None => x,
        };

        // Residual groups
        let x = self.groups.iter().fold(x, |x, group| group.forward(x));

        // Head
        let x = match &self.head_bn_relu {
            Some(bn_relu) => bn_relu.forward(x),
            None => x,
        };
        let x = self.pool.forward(x);
        // Reshape [B, C, 1, 1] -> [B, C]
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = self.fc.forward(x);

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "num_classes"];
            OUTPUT_CONTRACT.assert_shape(&x, &[("batch", batch), ("num_classes", self.num_classes())]);
        });

        x
    }

    /// The L2 kernel penalty.
    ///
    /// ``l2_reg * sum(w^2)`` over every conv kernel and the dense kernel;
    /// biases and norm parameters are not regularized.
    pub fn regularization_loss(&self) -> Tensor<B, 1> {
        let l2 = self
            .groups
            .iter()
            .fold(kernel_l2(&self.stem.weight), |acc, group| {
                acc + group.kernel_l2()
            });
        let l2 = l2 + kernel_l2(&self.fc.weight);
        l2.mul_scalar(self.l2_reg)
    }

    /// Re-initialize the classifier with the specified number of output classes.
    pub fn with_classes(
        mut self,
        num_classes: usize,
    ) -> Self {
        let [d_input, _d_output] = self.fc.weight.dims();
        self.fc = LinearConfig::new(d_input, num_classes)
            .with_initializer(Initializer::XavierUniform { gain: 1.0 })
            .init(&self.fc.weight.device());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use hamcrest::prelude::*;

    fn tiny_config(block_type: BlockType) -> ResNetConfig {
        ResNetConfig::new([3, 8, 8], 5)
            .with_group_sizes(vec![1, 2, 1])
            .with_features(vec![8, 16, 32])
            .with_first_conv(FirstConvConfig::new().with_filters(4))
            .with_block_type(block_type)
    }

    #[test]
    fn test_resnet_config_defaults() {
        let config = ResNetConfig::new([3, 32, 32], 10);
        assert_eq!(config.l2_reg, 0.5e-4);
        assert_eq!(config.group_sizes, vec![2, 2, 2]);
        assert_eq!(config.features, vec![16, 32, 64]);
        assert_eq!(config.strides, vec![1, 2, 2]);
        assert_eq!(config.shortcut_type, ShortcutType::Projection);
        assert_eq!(config.block_type, BlockType::PreActivated);
        assert_eq!(config.first_conv.filters, 16);
        assert_eq!(config.first_conv.kernel_size, 3);
        assert_eq!(config.first_conv.stride, 1);
        assert_eq!(config.dropout, 0.0);
        assert_eq!(config.cardinality, 1);
        assert_eq!(config.bottleneck_width, 4);

        config.expect_valid();
        assert_eq!(config.num_groups(), 3);
        assert_eq!(config.num_blocks(), 6);
        assert_eq!(config.weighted_depth(), 14);
        assert_eq!(config.head_planes(), 64);
        assert_eq!(config.output_resolution(), [8, 8]);
    }

    #[test]
    fn test_resnet_config_group_chaining() {
        let config = ResNetConfig::new([3, 32, 32], 10);
        let groups = config.group_configs();

        let planes: Vec<(usize, usize, usize)> = groups
            .iter()
            .map(|g| (g.in_planes(), g.out_planes(), g.stride()))
            .collect();
        assert_eq!(planes, vec![(16, 16, 1), (16, 32, 2), (32, 64, 2)]);
    }

    #[test]
    fn test_resnet_config_zip_truncates() {
        let config = ResNetConfig::new([3, 32, 32], 10)
            .with_group_sizes(vec![1, 1])
            .with_features(vec![8, 16, 32, 64]);
        assert_eq!(config.num_groups(), 2);
        assert_eq!(config.group_configs().len(), 2);
        assert_eq!(config.head_planes(), 16);
        assert_eq!(config.output_resolution(), [16, 16]);
    }

    #[test]
    fn test_resnet_config_validate() {
        let config = ResNetConfig::new([3, 32, 32], 10);

        assert_eq!(
            config
                .clone()
                .with_first_conv(FirstConvConfig::new().with_kernel_size(4))
                .try_validate(),
            Err("first_conv.kernel_size must be odd: 4".to_string())
        );
        assert_eq!(
            config.clone().with_dropout(1.5).try_validate(),
            Err("dropout must be in [0, 1): 1.5".to_string())
        );
        assert!(config.clone().with_strides(vec![]).try_validate().is_err());
        assert_eq!(
            config
                .clone()
                .with_group_sizes(vec![2, 0, 2])
                .try_validate(),
            Err("group[1]: blocks is empty".to_string())
        );
        let err = config
            .clone()
            .with_block_type(BlockType::Bottleneck)
            .with_features(vec![16, 30, 64])
            .try_validate()
            .unwrap_err();
        assert_that!(
            err.as_str(),
            matches_regex(r"^group\[1\]: block\[0\]: planes\(30\) must be a positive multiple")
        );

        for l2_reg in [-1.0, f64::NAN, f64::INFINITY] {
            let err = config.clone().with_l2_reg(l2_reg).try_validate().unwrap_err();
            assert_that!(err.as_str(), matches_regex(r"^l2_reg must be finite and >= 0: "));
        }
        assert!(config.with_l2_reg(0.0).try_validate().is_ok());
    }

    #[test]
    #[should_panic(expected = "block stride must be > 0")]
    fn test_resnet_config_output_resolution_zero_stride() {
        let config = ResNetConfig::new([3, 32, 32], 10).with_strides(vec![1, 0, 2]);
        let _ = config.output_resolution();
    }

    #[test]
    fn test_resnet_structure() {
        type B = NdArray<f32>;
        let device = Default::default();

        let original: ResNet<B> = tiny_config(BlockType::Original).init(&device);
        assert!(original.stem_bn_relu.is_some());
        assert!(original.head_bn_relu.is_none());

        let preact: ResNet<B> = tiny_config(BlockType::PreActivated).init(&device);
        assert!(preact.stem_bn_relu.is_none());
        assert!(preact.head_bn_relu.is_some());

        let bottleneck: ResNet<B> = tiny_config(BlockType::Bottleneck).init(&device);
        assert!(bottleneck.stem_bn_relu.is_none());
        assert_eq!(bottleneck.num_groups(), 3);
        assert_eq!(bottleneck.num_blocks(), 4);
        assert_eq!(bottleneck.weighted_depth(), 14);
        assert_eq!(
            bottleneck.weighted_depth(),
            tiny_config(BlockType::Bottleneck).weighted_depth()
        );
        assert_eq!(bottleneck.in_channels(), 3);
        assert_eq!(bottleneck.head_planes(), 32);
        assert_eq!(bottleneck.num_classes(), 5);
        assert_eq!(bottleneck.output_resolution(), [2, 2]);
    }

    #[test]
    fn test_resnet_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        for block_type in [
            BlockType::Original,
            BlockType::PreActivated,
            BlockType::Bottleneck,
        ] {
            for shortcut_type in [ShortcutType::Padding, ShortcutType::Projection] {
                let model: ResNet<B> = tiny_config(block_type.clone())
                    .with_shortcut_type(shortcut_type)
                    .init(&device);

                let input = Tensor::ones([2, 3, 8, 8], &device);
                let output = model.forward(input);

                assert_eq!(output.dims(), [2, 5]);
            }
        }
    }

    #[test]
    fn test_resnet_with_classes() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet<B> = tiny_config(BlockType::PreActivated)
            .init(&device)
            .with_classes(3);
        assert_eq!(model.num_classes(), 3);
        assert_eq!(model.head_planes(), 32);

        let output = model.forward(Tensor::ones([1, 3, 8, 8], &device));
        assert_eq!(output.dims(), [1, 3]);
    }

    #[test]
    #[should_panic]
    fn test_resnet_forward_rejects_resolution() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet<B> = tiny_config(BlockType::PreActivated).init(&device);
        let _ = model.forward(Tensor::ones([1, 3, 16, 16], &device));
    }

    #[test]
    fn test_resnet_regularization_loss_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: ResNet<B> = tiny_config(BlockType::PreActivated)
            .with_l2_reg(1e-3)
            .init(&device);

        let loss: f32 = model.regularization_loss().into_scalar();
        assert!(loss > 0.0);

        let doubled = ResNet {
            l2_reg: 2e-3,
            ..model.clone()
        };
        let doubled_loss: f32 = doubled.regularization_loss().into_scalar();
        assert!((doubled_loss - 2.0 * loss).abs() <= 1e-4 * loss.abs());

        let unregularized = ResNet {
            l2_reg: 0.0,
            ..model.clone()
        };
        let zero: f32 = unregularized.regularization_loss().into_scalar();
        assert_eq!(zero, 0.0);

        let grads = model.regularization_loss().backward();
        assert!(model.fc.weight.grad(&grads).is_some());
        assert!(model.stem.weight.grad(&grads).is_some());
    }
}
