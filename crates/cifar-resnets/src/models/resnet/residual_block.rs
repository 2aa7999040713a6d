//! # Residual Block Wrapper
//!
//! [`BlockType`] names the residual unit used throughout a network;
//! [`BlockOptions`] carries the network-wide block settings.
//!
//! [`ResidualBlockConfig`] and [`ResidualBlock`] wrap the
//! [`OriginalBlock`], [`PreActBlock`] and [`BottleneckBlock`] kinds.

use crate::layers::blocks::conv::same_output_resolution;
use crate::models::resnet::bottleneck_block::{BottleneckBlock, BottleneckBlockConfig};
use crate::models::resnet::original_block::{OriginalBlock, OriginalBlockConfig};
use crate::models::resnet::preact_block::{PreActBlock, PreActBlockConfig};
use crate::models::resnet::shortcut::ShortcutType;
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};
use std::str::FromStr;

/// The residual unit kind.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum BlockType {
    /// Post-activation [`OriginalBlock`].
    Original,

    /// Pre-activation [`PreActBlock`].
    PreActivated,

    /// Pre-activation [`BottleneckBlock`].
    Bottleneck,
}

impl BlockType {
    /// The canonical name of the block type.
    pub fn name(&self) -> &'static str {
        match self {
            BlockType::Original => "original",
            BlockType::PreActivated => "preactivated",
            BlockType::Bottleneck => "bottleneck",
        }
    }
}

impl FromStr for BlockType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(BlockType::Original),
            "preactivated" => Ok(BlockType::PreActivated),
            // "bootleneck" is the historical spelling of saved model names.
            "bottleneck" | "bootleneck" => Ok(BlockType::Bottleneck),
            _ => anyhow::bail!("Block type not recognized: {s:?}"),
        }
    }
}

/// Network-wide residual block settings.
#[derive(Config, Debug)]
pub struct BlockOptions {
    /// The shortcut alignment strategy.
    #[config(default = "ShortcutType::Projection")]
    pub shortcut_type: ShortcutType,

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

impl Default for BlockOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ResidualBlock`] Meta API.
pub trait ResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The stride of convolution.
    ///
    /// Affects shortcut behavior.
    fn stride(&self) -> usize;

    /// The number of convs on the main (non-shortcut) path.
    fn main_path_depth(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[ceil(in_height / stride), ceil(in_width / stride)]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        same_output_resolution(input_resolution, self.stride())
    }
}

/// [`ResidualBlock`] Config.
#[derive(Config, Debug)]
pub enum ResidualBlockConfig {
    /// An [`OriginalBlock`].
    Original(OriginalBlockConfig),

    /// A [`PreActBlock`].
    PreActivated(PreActBlockConfig),

    /// A [`BottleneckBlock`].
    Bottleneck(BottleneckBlockConfig),
}

impl From<OriginalBlockConfig> for ResidualBlockConfig {
    fn from(config: OriginalBlockConfig) -> Self {
        Self::Original(config)
    }
}

impl From<PreActBlockConfig> for ResidualBlockConfig {
    fn from(config: PreActBlockConfig) -> Self {
        Self::PreActivated(config)
    }
}

impl From<BottleneckBlockConfig> for ResidualBlockConfig {
    fn from(config: BottleneckBlockConfig) -> Self {
        Self::Bottleneck(config)
    }
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_planes(&self) -> usize {
        match self {
            Self::Original(config) => config.in_planes(),
            Self::PreActivated(config) => config.in_planes(),
            Self::Bottleneck(config) => config.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Original(config) => config.out_planes(),
            Self::PreActivated(config) => config.out_planes(),
            Self::Bottleneck(config) => config.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Original(config) => config.stride(),
            Self::PreActivated(config) => config.stride(),
            Self::Bottleneck(config) => config.stride(),
        }
    }

    fn main_path_depth(&self) -> usize {
        match self {
            Self::Original(config) => config.main_path_depth(),
            Self::PreActivated(config) => config.main_path_depth(),
            Self::Bottleneck(config) => config.main_path_depth(),
        }
    }
}

impl ResidualBlockConfig {
    /// Build a block config of the given type.
    ///
    /// The original block has no use for `group_leader`, and ignores it.
    pub fn build(
        block_type: &BlockType,
        in_planes: usize,
        planes: usize,
        stride: usize,
        group_leader: bool,
        options: &BlockOptions,
    ) -> Self {
        match block_type {
            BlockType::Original => OriginalBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .with_shortcut_type(options.shortcut_type.clone())
                .into(),
            BlockType::PreActivated => PreActBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .with_group_leader(group_leader)
                .with_dropout(options.dropout)
                .with_shortcut_type(options.shortcut_type.clone())
                .into(),
            BlockType::Bottleneck => BottleneckBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .with_group_leader(group_leader)
                .with_cardinality(options.cardinality)
                .with_bottleneck_width(options.bottleneck_width)
                .with_shortcut_type(options.shortcut_type.clone())
                .into(),
        }
    }

    /// The wrapped block type.
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Original(_) => BlockType::Original,
            Self::PreActivated(_) => BlockType::PreActivated,
            Self::Bottleneck(_) => BlockType::Bottleneck,
        }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.stride() == 0 {
            return Err("block stride must be > 0".to_string());
        }
        match self {
            Self::Original(config) => config.try_validate(),
            Self::PreActivated(config) => config.try_validate(),
            Self::Bottleneck(config) => config.try_validate(),
        }
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        match self {
            Self::Original(config) => config.init(device).into(),
            Self::PreActivated(config) => config.init(device).into(),
            Self::Bottleneck(config) => config.init(device).into(),
        }
    }
}

/// A `ResNet` residual block wrapper.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ResidualBlock<B: Backend> {
    /// An [`OriginalBlock`].
    Original(OriginalBlock<B>),

    /// A [`PreActBlock`].
    PreActivated(PreActBlock<B>),

    /// A [`BottleneckBlock`].
    Bottleneck(BottleneckBlock<B>),
}

impl<B: Backend> From<OriginalBlock<B>> for ResidualBlock<B> {
    fn from(block: OriginalBlock<B>) -> Self {
        Self::Original(block)
    }
}

impl<B: Backend> From<PreActBlock<B>> for ResidualBlock<B> {
    fn from(block: PreActBlock<B>) -> Self {
        Self::PreActivated(block)
    }
}

impl<B: Backend> From<BottleneckBlock<B>> for ResidualBlock<B> {
    fn from(block: BottleneckBlock<B>) -> Self {
        Self::Bottleneck(block)
    }
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_planes(&self) -> usize {
        match self {
            Self::Original(block) => block.in_planes(),
            Self::PreActivated(block) => block.in_planes(),
            Self::Bottleneck(block) => block.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Original(block) => block.out_planes(),
            Self::PreActivated(block) => block.out_planes(),
            Self::Bottleneck(block) => block.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Original(block) => block.stride(),
            Self::PreActivated(block) => block.stride(),
            Self::Bottleneck(block) => block.stride(),
        }
    }

    fn main_path_depth(&self) -> usize {
        match self {
            Self::Original(block) => block.main_path_depth(),
            Self::PreActivated(block) => block.main_path_depth(),
            Self::Bottleneck(block) => block.main_path_depth(),
        }
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// The wrapped block type.
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Original(_) => BlockType::Original,
            Self::PreActivated(_) => BlockType::PreActivated,
            Self::Bottleneck(_) => BlockType::Bottleneck,
        }
    }

    /// Apply the wrapped block to the input.
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
        match self {
            Self::Original(block) => block.forward(input),
            Self::PreActivated(block) => block.forward(input),
            Self::Bottleneck(block) => block.forward(input),
        }
    }

    /// Sum of squares of every regularized kernel in the block.
    pub fn kernel_l2(&self) -> Tensor<B, 1> {
        match self {
            Self::Original(block) => block.kernel_l2(),
            Self::PreActivated(block) => block.kernel_l2(),
            Self::Bottleneck(block) => block.kernel_l2(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_block_type_names() {
        for block_type in [
            BlockType::Original,
            BlockType::PreActivated,
            BlockType::Bottleneck,
        ] {
            assert_eq!(block_type.name().parse::<BlockType>().unwrap(), block_type);
        }
        assert_eq!(
            "bootleneck".parse::<BlockType>().unwrap(),
            BlockType::Bottleneck
        );
        assert!("resnext".parse::<BlockType>().is_err());
    }

    #[test]
    fn test_residual_block_config_build() {
        let options = BlockOptions::new()
            .with_dropout(0.25)
            .with_cardinality(2)
            .with_shortcut_type(ShortcutType::Padding);

        let cfg = ResidualBlockConfig::build(&BlockType::Original, 16, 32, 2, true, &options);
        assert_eq!(cfg.block_type(), BlockType::Original);
        assert_eq!(cfg.in_planes(), 16);
        assert_eq!(cfg.out_planes(), 32);
        assert_eq!(cfg.stride(), 2);
        assert_eq!(cfg.main_path_depth(), 2);

        let cfg = ResidualBlockConfig::build(&BlockType::PreActivated, 16, 32, 2, true, &options);
        match &cfg {
            ResidualBlockConfig::PreActivated(inner) => {
                assert!(inner.group_leader);
                assert_eq!(inner.dropout, 0.25);
                assert_eq!(inner.shortcut_type, ShortcutType::Padding);
            }
            _ => panic!("Unexpected config type"),
        }

        let cfg = ResidualBlockConfig::build(&BlockType::Bottleneck, 16, 64, 1, false, &options);
        assert_eq!(cfg.main_path_depth(), 3);
        match &cfg {
            ResidualBlockConfig::Bottleneck(inner) => {
                assert!(!inner.group_leader);
                assert_eq!(inner.cardinality, 2);
                assert_eq!(inner.width(), 16);
            }
            _ => panic!("Unexpected config type"),
        }
        assert!(cfg.try_validate().is_ok());
    }

    #[test]
    fn test_residual_block() {
        type B = NdArray<f32>;
        let device = Default::default();

        let options = BlockOptions::default();
        for block_type in [
            BlockType::Original,
            BlockType::PreActivated,
            BlockType::Bottleneck,
        ] {
            let cfg = ResidualBlockConfig::build(&block_type, 8, 16, 2, true, &options);
            let block: ResidualBlock<B> = cfg.init(&device);
            assert_eq!(block.block_type(), block_type);
            assert_eq!(block.in_planes(), 8);
            assert_eq!(block.out_planes(), 16);
            assert_eq!(block.stride(), 2);
            assert_eq!(block.main_path_depth(), cfg.main_path_depth());

            let input = Tensor::ones([2, 8, 6, 6], &device);
            let output = block.forward(input);

            assert_eq!(output.dims(), [2, 16, 3, 3]);
        }
    }
}
