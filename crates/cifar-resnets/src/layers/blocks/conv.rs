//! # Regularized Padded Convolutions
//!
//! Every convolution in the CIFAR `ResNet` family is:
//! * square, with an odd kernel size,
//! * ``same``-padded (``out = ceil(in / stride)``),
//! * bias-free,
//! * He-normal initialized,
//! * L2-regularized through [`kernel_l2`] (see
//!   [`crate::models::resnet::resnet_model::ResNet::regularization_loss`]).

use burn::module::Param;
use burn::nn::conv::Conv2dConfig;
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use core::f64::consts::SQRT_2;

/// He-normal kernel initializer; ``std = sqrt(2 / fan_in)``.
pub const HE_NORMAL_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: SQRT_2,
    fan_out_only: false,
};

/// Build a ``same``-padded, bias-free, He-normal [`Conv2dConfig`].
///
/// # Arguments
///
/// - `channels`: ``[in_channels, out_channels]``.
/// - `kernel_size`: the (odd) square kernel size.
/// - `stride`: the square stride.
///
/// # Panics
///
/// If `kernel_size` is even or zero; ``same`` padding is only symmetric for odd kernels.
pub fn padded_conv2d_config(
    channels: [usize; 2],
    kernel_size: usize,
    stride: usize,
) -> Conv2dConfig {
    assert!(
        kernel_size % 2 == 1,
        "same padding requires an odd kernel size: {kernel_size}"
    );
    let padding = kernel_size / 2;

    Conv2dConfig::new(channels, [kernel_size, kernel_size])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_initializer(HE_NORMAL_INITIALIZER)
        .with_bias(false)
}

/// The ``same``-padded output size of a strided axis.
///
/// ``ceil(size / stride)``
#[inline(always)]
pub fn same_output_size(
    size: usize,
    stride: usize,
) -> usize {
    size.div_ceil(stride)
}

/// The ``same``-padded output resolution of a strided layer.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in, width_in]``.
///
/// # Returns
///
/// ``[ceil(height_in / stride), ceil(width_in / stride)]``
#[inline(always)]
pub fn same_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    let [height, width] = input_resolution;
    [
        same_output_size(height, stride),
        same_output_size(width, stride),
    ]
}

/// Sum of squares of a kernel parameter.
///
/// Biases are not passed here; only kernels are regularized.
pub fn kernel_l2<B: Backend, const D: usize>(weight: &Param<Tensor<B, D>>) -> Tensor<B, 1> {
    weight.val().powf_scalar(2.0).sum()
}
