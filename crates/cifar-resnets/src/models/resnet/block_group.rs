//! # `ResNet` Block Group
//!
//! A [`BlockGroup`] is a sequence of [`ResidualBlock`]s sharing one
//! output width. The first block (the group leader) carries the group
//! stride and aligns the planes; the rest are stride 1.
//!
//! [`BlockGroupConfig`] implements [`Config`], and provides
//! [`BlockGroupConfig::init`] to initialize a [`BlockGroup`].

use crate::models::resnet::residual_block::{
    BlockOptions, BlockType, ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`BlockGroup`] Meta API.
pub trait BlockGroupMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the group is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the group.
    fn stride(&self) -> usize;

    /// The number of convs on the main paths of all blocks.
    fn main_path_depth(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// [`BlockGroup`] Configuration.
#[derive(Config, Debug)]
pub struct BlockGroupConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for BlockGroupConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl BlockGroupMeta for BlockGroupConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }

    fn main_path_depth(&self) -> usize {
        self.blocks.iter().map(|b| b.main_path_depth()).sum()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.blocks
            .iter()
            .fold(input_resolution, |res, block| block.output_resolution(res))
    }
}

impl BlockGroupConfig {
    /// Build a group of `num_blocks` blocks.
    ///
    /// The first block takes `in_planes`, `stride` and the group-leader flag;
    /// the remaining blocks map `planes -> planes` with stride 1.
    pub fn build(
        block_type: &BlockType,
        num_blocks: usize,
        in_planes: usize,
        planes: usize,
        stride: usize,
        options: &BlockOptions,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    ResidualBlockConfig::build(block_type, in_planes, planes, stride, true, options)
                } else {
                    ResidualBlockConfig::build(block_type, planes, planes, 1, false, options)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for (idx, block) in self.blocks.iter().enumerate() {
            block
                .try_validate()
                .map_err(|err| format!("block[{idx}]: {err}"))?;
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                ));
            }
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

    /// Initialize a new [`BlockGroup`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BlockGroup<B> {
        self.expect_valid();

        BlockGroup {
            blocks: self.blocks.iter().map(|block| block.init(device)).collect(),
        }
    }
}

/// A group of residual blocks.
#[derive(Module, Debug)]
pub struct BlockGroup<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> BlockGroupMeta for BlockGroup<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }

    fn main_path_depth(&self) -> usize {
        self.blocks.iter().map(|b| b.main_path_depth()).sum()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.blocks
            .iter()
            .fold(input_resolution, |res, block| block.output_resolution(res))
    }
}

impl<B: Backend> BlockGroup<B> {
    /// Apply the block group.
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

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

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

    /// Sum of squares of every regularized kernel in the group.
    pub fn kernel_l2(&self) -> Tensor<B, 1> {
        self.blocks
            .iter()
            .map(|block| block.kernel_l2())
            .reduce(|acc, l2| acc + l2)
            .expect("a block group is never empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::preact_block::PreActBlockConfig;
    use burn::backend::NdArray;

    #[test]
    fn test_block_group_config_build() {
        let config =
            BlockGroupConfig::build(&BlockType::PreActivated, 3, 16, 32, 2, &BlockOptions::new());
        config.expect_valid();
        assert_eq!(config.len(), 3);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.main_path_depth(), 6);
        assert_eq!(config.output_resolution([32, 32]), [16, 16]);

        let leaders: Vec<bool> = config
            .blocks
            .iter()
            .map(|b| match b {
                ResidualBlockConfig::PreActivated(inner) => inner.group_leader,
                _ => panic!("Unexpected config type"),
            })
            .collect();
        assert_eq!(leaders, vec![true, false, false]);

        let block2 = &config.blocks[1];
        assert_eq!(block2.in_planes(), 32);
        assert_eq!(block2.out_planes(), 32);
        assert_eq!(block2.stride(), 1);
    }

    #[test]
    fn test_block_group_config_validate() {
        assert_eq!(
            BlockGroupConfig::from(vec![]).try_validate(),
            Err("blocks is empty".to_string())
        );

        let config = BlockGroupConfig::from(vec![
            PreActBlockConfig::new(16, 32).into(),
            PreActBlockConfig::new(16, 32).into(),
        ]);
        assert_eq!(
            config.try_validate(),
            Err("block[0].out_planes(32) != block[1].in_planes(16)".to_string())
        );
    }

    #[test]
    fn test_block_group() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config =
            BlockGroupConfig::build(&BlockType::Original, 2, 4, 8, 2, &BlockOptions::default());
        let group: BlockGroup<B> = config.init(&device);

        assert_eq!(group.len(), 2);
        assert_eq!(group.in_planes(), 4);
        assert_eq!(group.out_planes(), 8);
        assert_eq!(group.stride(), 2);
        assert_eq!(group.main_path_depth(), 4);

        let input = Tensor::ones([2, 4, 10, 10], &device);
        let output = group.forward(input.clone());
        assert_eq!(output.dims(), [2, 8, 5, 5]);

        let mut expected = input;
        for block in group.blocks.iter() {
            expected = block.forward(expected);
        }
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
