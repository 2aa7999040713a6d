//! # Pre-Activation Bottleneck Block for `ResNet`
//!
//! [`BottleneckBlock`] is the bottleneck form of the pre-activation unit,
//! used by `ResNet-164`, `ResNet-1001` and (with grouped convs) `ResNeXt`:
//!
//! ```text,ignore
//! flow  = bn_relu(x)
//! if group_leader: x = flow
//! width = planes / bottleneck_width
//! c1    = conv1x1(width)(flow)
//! c2    = conv3x3(width, stride, groups=cardinality)(bn_relu(c1))
//! c3    = conv1x1(planes)(bn_relu(c2))
//! out   = shortcut(x) + c3
//! ```

use crate::layers::blocks::bn_relu::{BnRelu, BnReluConfig};
use crate::layers::blocks::conv::{kernel_l2, padded_conv2d_config};
use crate::models::resnet::residual_block::ResidualBlockMeta;
use crate::models::resnet::shortcut::{Shortcut, ShortcutConfig, ShortcutType, apply_shortcut};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::conv::Conv2d;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BottleneckBlock`] Config.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// The number of input planes.
    pub in_planes: usize,

    /// The number of output planes.
    pub planes: usize,

    /// The stride of the 3x3 conv.
    #[config(default = 1)]
    pub stride: usize,

    /// Is this the first block of a group?
    #[config(default = "false")]
    pub group_leader: bool,

    /// Groups of the 3x3 conv filters.
    #[config(default = 1)]
    pub cardinality: usize,

    /// Ratio of `planes` to the inner `width()`.
    #[config(default = 4)]
    pub bottleneck_width: usize,

    /// The shortcut alignment strategy.
    #[config(default = "ShortcutType::Projection")]
    pub shortcut_type: ShortcutType,
}

impl ResidualBlockMeta for BottleneckBlockConfig {
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
        3
    }
}

impl BottleneckBlockConfig {
    /// Inner planes of the bottleneck.
    ///
    /// ``planes / bottleneck_width``
    pub fn width(&self) -> usize {
        self.planes / self.bottleneck_width
    }

    /// The residual shortcut config.
    pub fn shortcut(&self) -> ShortcutConfig {
        ShortcutConfig::new(self.in_planes, self.planes)
            .with_stride(self.stride)
            .with_shortcut_type(self.shortcut_type.clone())
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.bottleneck_width == 0 || self.cardinality == 0 {
            return Err(format!(
                "bottleneck_width({}) and cardinality({}) must be > 0",
                self.bottleneck_width, self.cardinality
            ));
        }
        if self.planes % self.bottleneck_width != 0 || self.width() == 0 {
            return Err(format!(
                "planes({}) must be a positive multiple of bottleneck_width({})",
                self.planes, self.bottleneck_width
            ));
        }
        if self.width() % self.cardinality != 0 {
            return Err(format!(
                "width({}) must be a multiple of cardinality({})",
                self.width(),
                self.cardinality
            ));
        }
        self.shortcut().try_validate()
    }

    /// Initialize a [`BottleneckBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
        let width = self.width();

        BottleneckBlock {
            group_leader: self.group_leader,
            bn_relu1: BnReluConfig::new(self.in_planes).init(device),
            conv1: padded_conv2d_config([self.in_planes, width], 1, 1).init(device),
            bn_relu2: BnReluConfig::new(width).init(device),
            conv2: padded_conv2d_config([width, width], 3, self.stride)
                .with_groups(self.cardinality)
                .init(device),
            bn_relu3: BnReluConfig::new(width).init(device),
            conv3: padded_conv2d_config([width, self.planes], 1, 1).init(device),
            shortcut: self.shortcut().init(device),
        }
    }
}

/// Pre-activation bottleneck `ResNet` block.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// Is this the first block of a group?
    pub group_leader: bool,

    /// Input norm / activation.
    pub bn_relu1: BnRelu<B>,
    /// 1x1 reduction conv.
    pub conv1: Conv2d<B>,
    /// Second norm / activation.
    pub bn_relu2: BnRelu<B>,
    /// 3x3 (grouped) conv; carries the stride.
    pub conv2: Conv2d<B>,
    /// Third norm / activation.
    pub bn_relu3: BnRelu<B>,
    /// 1x1 expansion conv.
    pub conv3: Conv2d<B>,

    /// Optional shortcut alignment; `None` is the identity.
    pub shortcut: Option<Shortcut<B>>,
}

impl<B: Backend> ResidualBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.weight.shape().dims[1]
    }

    fn out_planes(&self) -> usize {
        self.conv3.weight.shape().dims[0]
    }

    fn stride(&self) -> usize {
        self.conv2.stride[0]
    }

    fn main_path_depth(&self) -> usize {
        3
    }
}

impl<B: Backend> BottleneckBlock<B> {
    /// Inner planes of the bottleneck.
    pub fn width(&self) -> usize {
        self.conv3.weight.shape().dims[1]
    }

    /// Groups of the 3x3 conv.
    pub fn cardinality(&self) -> usize {
        self.conv2.groups
    }

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

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "width", "in_height", "in_width"];
            OUTPUT_CONTRACT.assert_shape(
                &x,
                &[
                    ("batch", batch),
                    ("width", self.width()),
                    ("in_height", in_height),
                    ("in_width", in_width)
                ],
            );
        });

        let x = self.conv2.forward(self.bn_relu2.forward(x));
        let x = self.conv3.forward(self.bn_relu3.forward(x));

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
        let l2 = kernel_l2(&self.conv1.weight)
            + kernel_l2(&self.conv2.weight)
            + kernel_l2(&self.conv3.weight);
        match self.shortcut.as_ref().and_then(|s| s.kernel_l2()) {
            Some(s) => l2 + s,
            None => l2,
        }
    }
}
