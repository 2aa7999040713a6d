#![warn(missing_docs)]
//!# cifar-resnets - `ResNet` Architectures for CIFAR-sized Images
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks::conv`] - regularized ``same``-padded conv configs.
//!   * [`layers::blocks::bn_relu`] - ``BatchNorm2d + ReLU`` block.
//! * [`models`] - complete model families.
//!   * [`models::resnet`] - the CIFAR `ResNet` family:
//!     original, pre-activation, bottleneck, wide and `ResNeXt` variants.
//!   * [`models::resnet::prefabs`] - named, published architectures.
//!   * [`models::resnet::weights`] - best-effort weight loading.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod layers;
pub mod models;
