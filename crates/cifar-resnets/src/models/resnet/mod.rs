//! # CIFAR `ResNet`
//!
//! The `ResNet` family for small (CIFAR-style) images:
//! original (post-activation), pre-activation, bottleneck, wide and `ResNeXt`.
//!
//! See:
//! * [`ResNetConfig`] / [`ResNet`] for the network assembler,
//! * [`PREFAB_CIFAR_RESNET_MAP`] and [`prefabs`] for the named architectures,
//! * [`weights`] for saved weights.

pub mod block_group;
pub mod bottleneck_block;
pub mod original_block;
pub mod preact_block;
pub mod prefabs;
pub mod residual_block;
pub mod resnet_model;
pub mod shortcut;
pub mod weights;

pub use prefabs::{PREFAB_CIFAR_RESNET_MAP, StaticPreFab, StaticPreFabMap};
pub use residual_block::{BlockOptions, BlockType};
pub use resnet_model::{FirstConvConfig, ResNet, ResNetConfig};
pub use shortcut::ShortcutType;
