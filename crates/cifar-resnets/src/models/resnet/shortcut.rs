//! # Residual Shortcut Alignment
//!
//! When a block changes the number of planes, or the resolution, the
//! residual input must be aligned with the block output before the sum.
//!
//! [`ShortcutType`] selects the alignment strategy:
//! * `A` / `padding` - subsample, then zero-pad the channel axis.
//! * `B` / `projection` - a strided 1x1 convolution.
//!
//! [`ShortcutConfig::init`] yields `None` for an identity shortcut.

use crate::layers::blocks::conv::{kernel_l2, padded_conv2d_config, same_output_resolution};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::conv::Conv2d;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use std::str::FromStr;

/// Shortcut alignment strategy.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum ShortcutType {
    /// Option `A`: parameter-free subsample and zero-pad.
    Padding,

    /// Option `B`: strided 1x1 conv projection.
    Projection,
}

impl ShortcutType {
    /// The canonical name of the strategy.
    pub fn name(&self) -> &'static str {
        match self {
            ShortcutType::Padding => "padding",
            ShortcutType::Projection => "projection",
        }
    }
}

impl FromStr for ShortcutType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "padding" => Ok(ShortcutType::Padding),
            "B" | "projection" => Ok(ShortcutType::Projection),
            _ => anyhow::bail!("Shortcut type not recognized: {s:?}"),
        }
    }
}

/// [`Shortcut`] Meta trait.
pub trait ShortcutMeta {
    /// The number of input planes.
    fn in_planes(&self) -> usize;

    /// The number of output planes.
    fn out_planes(&self) -> usize;

    /// The subsampling stride.
    fn stride(&self) -> usize;

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

/// [`Shortcut`] Config.
///
/// Implements [`ShortcutMeta`].
#[derive(Config, Debug)]
pub struct ShortcutConfig {
    /// The number of input planes.
    pub in_planes: usize,

    /// The number of output planes.
    pub out_planes: usize,

    /// The subsampling stride.
    #[config(default = 1)]
    pub stride: usize,

    /// The alignment strategy.
    #[config(default = "ShortcutType::Projection")]
    pub shortcut_type: ShortcutType,
}

impl ShortcutMeta for ShortcutConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ShortcutConfig {
    /// Is this shortcut a pass-through?
    pub fn is_identity(&self) -> bool {
        self.in_planes == self.out_planes && self.stride == 1
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.stride == 0 {
            return Err("shortcut stride must be > 0".to_string());
        }
        if self.shortcut_type == ShortcutType::Padding && self.out_planes < self.in_planes {
            return Err(format!(
                "padding shortcut cannot reduce planes: in_planes({}) > out_planes({})",
                self.in_planes, self.out_planes
            ));
        }
        Ok(())
    }

    /// Initialize the shortcut.
    ///
    /// # Returns
    ///
    /// `None` for an identity shortcut.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Option<Shortcut<B>> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
        if self.is_identity() {
            return None;
        }

        Some(match self.shortcut_type {
            ShortcutType::Projection => Shortcut::Projection(
                padded_conv2d_config([self.in_planes, self.out_planes], 1, self.stride)
                    .init(device),
            ),
            ShortcutType::Padding => Shortcut::Padding(PaddingShortcut {
                pool: if self.stride > 1 {
                    Some(
                        MaxPool2dConfig::new([1, 1])
                            .with_strides([self.stride, self.stride])
                            .init(),
                    )
                } else {
                    None
                },
                in_planes: self.in_planes,
                out_planes: self.out_planes,
                stride: self.stride,
            }),
        })
    }
}

/// Option `A` shortcut: subsample, then zero-pad the channels.
///
/// Implements [`ShortcutMeta`].
#[derive(Module, Clone, Debug)]
pub struct PaddingShortcut {
    /// 1x1 strided max pool; absent when ``stride == 1``.
    pub pool: Option<MaxPool2d>,

    /// The number of input planes.
    pub in_planes: usize,

    /// The number of output planes.
    pub out_planes: usize,

    /// The subsampling stride.
    pub stride: usize,
}

impl ShortcutMeta for PaddingShortcut {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl PaddingShortcut {
    /// Forward Pass.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = match &self.pool {
            Some(pool) => pool.forward(input),
            None => input,
        };

        let pad = self.out_planes - self.in_planes;
        if pad == 0 {
            return x;
        }

        let [batch, _, height, width] = x.dims();
        let zeros = Tensor::zeros([batch, pad, height, width], &x.device());
        Tensor::cat(vec![x, zeros], 1)
    }
}

/// Residual shortcut alignment layer.
///
/// Implements [`ShortcutMeta`].
#[derive(Module, Debug)]
pub enum Shortcut<B: Backend> {
    /// Option `A` padding shortcut.
    Padding(PaddingShortcut),

    /// Option `B` projection shortcut.
    Projection(Conv2d<B>),
}

impl<B: Backend> ShortcutMeta for Shortcut<B> {
    fn in_planes(&self) -> usize {
        match self {
            Shortcut::Padding(layer) => layer.in_planes(),
            Shortcut::Projection(conv) => conv.weight.shape().dims[1],
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Shortcut::Padding(layer) => layer.out_planes(),
            Shortcut::Projection(conv) => conv.weight.shape().dims[0],
        }
    }

    fn stride(&self) -> usize {
        match self {
            Shortcut::Padding(layer) => layer.stride(),
            Shortcut::Projection(conv) => conv.stride[0],
        }
    }
}

impl<B: Backend> Shortcut<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_planes, ceil(in_height / stride), ceil(in_width / stride)]``
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

        let x = match self {
            Shortcut::Padding(layer) => layer.forward(input),
            Shortcut::Projection(conv) => conv.forward(input),
        };

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

    /// Sum of squares of the regularized kernels; `None` when parameter-free.
    pub fn kernel_l2(&self) -> Option<Tensor<B, 1>> {
        match self {
            Shortcut::Padding(_) => None,
            Shortcut::Projection(conv) => Some(kernel_l2(&conv.weight)),
        }
    }
}

/// Apply an optional shortcut; `None` is the identity.
pub fn apply_shortcut<B: Backend>(
    shortcut: &Option<Shortcut<B>>,
    input: Tensor<B, 4>,
) -> Tensor<B, 4> {
    match shortcut {
        Some(shortcut) => shortcut.forward(input),
        None => input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_shortcut_type_names() {
        assert_eq!("A".parse::<ShortcutType>().unwrap(), ShortcutType::Padding);
        assert_eq!(
            "padding".parse::<ShortcutType>().unwrap(),
            ShortcutType::Padding
        );
        assert_eq!(
            "B".parse::<ShortcutType>().unwrap(),
            ShortcutType::Projection
        );
        assert_eq!(
            "projection".parse::<ShortcutType>().unwrap(),
            ShortcutType::Projection
        );
        assert_eq!(ShortcutType::Padding.name(), "padding");

        let err = "C".parse::<ShortcutType>().unwrap_err();
        assert_eq!(err.to_string(), "Shortcut type not recognized: \"C\"");
    }

    #[test]
    fn test_shortcut_config() {
        let config = ShortcutConfig::new(16, 16);
        assert!(config.is_identity());
        assert_eq!(config.output_resolution([8, 8]), [8, 8]);

        let config = config.with_stride(2);
        assert!(!config.is_identity());
        assert_eq!(config.output_resolution([8, 8]), [4, 4]);

        assert!(ShortcutConfig::new(16, 32).try_validate().is_ok());
        assert!(
            ShortcutConfig::new(32, 16)
                .with_shortcut_type(ShortcutType::Padding)
                .try_validate()
                .is_err()
        );
    }

    #[test]
    fn test_identity_shortcut() {
        type B = NdArray<f32>;
        let device = Default::default();

        let shortcut: Option<Shortcut<B>> = ShortcutConfig::new(4, 4).init(&device);
        assert!(shortcut.is_none());

        let input: Tensor<B, 4> = Tensor::ones([2, 4, 3, 3], &device);
        let output = apply_shortcut(&shortcut, input.clone());
        output.to_data().assert_eq(&input.to_data(), true);
    }

    #[test]
    fn test_projection_shortcut() {
        type B = NdArray<f32>;
        let device = Default::default();

        let shortcut: Shortcut<B> = ShortcutConfig::new(2, 6)
            .with_stride(2)
            .init(&device)
            .unwrap();
        assert!(matches!(shortcut, Shortcut::Projection(_)));
        assert_eq!(shortcut.in_planes(), 2);
        assert_eq!(shortcut.out_planes(), 6);
        assert_eq!(shortcut.stride(), 2);
        assert!(shortcut.kernel_l2().is_some());

        let input = Tensor::ones([3, 2, 7, 7], &device);
        let output = shortcut.forward(input);
        assert_eq!(output.dims(), [3, 6, 4, 4]);
    }

    #[test]
    fn test_padding_shortcut() {
        type B = NdArray<f32>;
        let device = Default::default();

        let shortcut: Shortcut<B> = ShortcutConfig::new(2, 4)
            .with_stride(2)
            .with_shortcut_type(ShortcutType::Padding)
            .init(&device)
            .unwrap();
        assert!(matches!(shortcut, Shortcut::Padding(_)));
        assert!(shortcut.kernel_l2().is_none());

        let input: Tensor<B, 4> = Tensor::ones([1, 2, 4, 4], &device);
        let output = shortcut.forward(input);
        assert_eq!(output.dims(), [1, 4, 2, 2]);

        let kept: f32 = output
            .clone()
            .slice([0..1, 0..2, 0..2, 0..2])
            .sum()
            .into_scalar();
        assert_eq!(kept, 8.0);

        let padded: f32 = output.slice([0..1, 2..4, 0..2, 0..2]).sum().into_scalar();
        assert_eq!(padded, 0.0);
    }

    #[test]
    fn test_padding_shortcut_subsamples() {
        type B = NdArray<f32>;
        let device = Default::default();

        let shortcut: Shortcut<B> = ShortcutConfig::new(1, 1)
            .with_stride(2)
            .with_shortcut_type(ShortcutType::Padding)
            .init(&device)
            .unwrap();

        let input: Tensor<B, 4> =
            Tensor::<B, 1>::from_floats([0., 1., 2., 3., 4., 5., 6., 7., 8.], &device)
                .reshape([1, 1, 3, 3]);
        let output = shortcut.forward(input);

        let expected: Tensor<B, 4> =
            Tensor::<B, 1>::from_floats([0., 2., 6., 8.], &device).reshape([1, 1, 2, 2]);
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
