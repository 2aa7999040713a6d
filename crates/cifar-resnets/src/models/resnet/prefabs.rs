//! # Well-Known CIFAR `ResNet` Configs
//!
//! Factory functions pin the [`ResNetConfig`] hyperparameters of published
//! CIFAR architectures; [`PREFAB_CIFAR_RESNET_MAP`] is the name-keyed
//! directory of them.
//!
//! Every factory builds a ``[3, 32, 32]`` input, 10 class network with a
//! ``{16, 3x3, stride 1}`` stem and group strides ``[1, 2, 2]``.

use crate::models::resnet::resnet_model::{ResNet, ResNetConfig};
use crate::models::resnet::residual_block::BlockType;
use crate::models::resnet::shortcut::ShortcutType;
use crate::models::resnet::weights::{DEFAULT_WEIGHTS_DIR, load_weights};
use anyhow::bail;
use burn::prelude::Backend;
use std::fmt::Debug;
use std::path::Path;

/// CIFAR input shape: ``[channels, height, width]``.
pub const CIFAR_INPUT_SHAPE: [usize; 3] = [3, 32, 32];

/// CIFAR-10 class count.
pub const CIFAR_NUM_CLASSES: usize = 10;

/// L2 factor of the deep (non-wide) networks.
pub const CIFAR_RESNET_L2_REG: f64 = 0.5e-4;

/// L2 factor of the wide networks.
pub const CIFAR_WIDE_RESNET_L2_REG: f64 = 2.5e-4;

fn cifar_base_config(
    group_size: usize,
    features: [usize; 3],
    block_type: BlockType,
    shortcut_type: ShortcutType,
) -> ResNetConfig {
    ResNetConfig::new(CIFAR_INPUT_SHAPE, CIFAR_NUM_CLASSES)
        .with_l2_reg(CIFAR_RESNET_L2_REG)
        .with_group_sizes(vec![group_size; 3])
        .with_features(features.to_vec())
        .with_strides(vec![1, 2, 2])
        .with_block_type(block_type)
        .with_shortcut_type(shortcut_type)
}

/// `ResNet-20`: 3 blocks per group.
pub fn cifar_resnet20(
    block_type: BlockType,
    shortcut_type: ShortcutType,
) -> ResNetConfig {
    cifar_base_config(3, [16, 32, 64], block_type, shortcut_type)
}

/// `ResNet-32`: 5 blocks per group.
pub fn cifar_resnet32(
    block_type: BlockType,
    shortcut_type: ShortcutType,
) -> ResNetConfig {
    cifar_base_config(5, [16, 32, 64], block_type, shortcut_type)
}

/// `ResNet-44`: 7 blocks per group.
pub fn cifar_resnet44(
    block_type: BlockType,
    shortcut_type: ShortcutType,
) -> ResNetConfig {
    cifar_base_config(7, [16, 32, 64], block_type, shortcut_type)
}

/// `ResNet-56`: 9 blocks per group.
pub fn cifar_resnet56(
    block_type: BlockType,
    shortcut_type: ShortcutType,
) -> ResNetConfig {
    cifar_base_config(9, [16, 32, 64], block_type, shortcut_type)
}

/// `ResNet-110`: 18 blocks per group.
pub fn cifar_resnet110(
    block_type: BlockType,
    shortcut_type: ShortcutType,
) -> ResNetConfig {
    cifar_base_config(18, [16, 32, 64], block_type, shortcut_type)
}

/// `ResNet-164`: 18 bottleneck blocks per group.
pub fn cifar_resnet164(shortcut_type: ShortcutType) -> ResNetConfig {
    cifar_base_config(18, [64, 128, 256], BlockType::Bottleneck, shortcut_type)
}

/// `ResNet-1001`: 111 bottleneck blocks per group.
pub fn cifar_resnet1001(shortcut_type: ShortcutType) -> ResNetConfig {
    cifar_base_config(111, [64, 128, 256], BlockType::Bottleneck, shortcut_type)
}

fn wide_resnet_config(
    group_size: usize,
    k: usize,
    block_type: BlockType,
    shortcut_type: ShortcutType,
    dropout: f64,
) -> ResNetConfig {
    cifar_base_config(
        group_size,
        [16 * k, 32 * k, 64 * k],
        block_type,
        shortcut_type,
    )
    .with_l2_reg(CIFAR_WIDE_RESNET_L2_REG)
    .with_dropout(dropout)
}

/// `WRN-N-K`: a wide `ResNet` of depth `n` and widening factor `k`.
///
/// # Errors
///
/// When ``(n - 4) % 6 != 0``, or the resulting config is invalid.
pub fn cifar_wide_resnet(
    n: usize,
    k: usize,
    block_type: BlockType,
    shortcut_type: ShortcutType,
    dropout: f64,
) -> anyhow::Result<ResNetConfig> {
    if n < 10 || (n - 4) % 6 != 0 {
        bail!("Wide ResNet depth must be 6 * n + 4, with n > 0: {n}");
    }
    let config = wide_resnet_config((n - 4) / 6, k, block_type, shortcut_type, dropout);
    config.try_validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

/// `WRN-16-4`.
pub fn cifar_wrn_16_4(
    shortcut_type: ShortcutType,
    dropout: f64,
) -> ResNetConfig {
    wide_resnet_config(2, 4, BlockType::PreActivated, shortcut_type, dropout)
}

/// `WRN-40-4`.
pub fn cifar_wrn_40_4(
    shortcut_type: ShortcutType,
    dropout: f64,
) -> ResNetConfig {
    wide_resnet_config(6, 4, BlockType::PreActivated, shortcut_type, dropout)
}

/// `WRN-16-8`.
pub fn cifar_wrn_16_8(
    shortcut_type: ShortcutType,
    dropout: f64,
) -> ResNetConfig {
    wide_resnet_config(2, 8, BlockType::PreActivated, shortcut_type, dropout)
}

/// `WRN-28-10`.
pub fn cifar_wrn_28_10(
    shortcut_type: ShortcutType,
    dropout: f64,
) -> ResNetConfig {
    wide_resnet_config(4, 10, BlockType::PreActivated, shortcut_type, dropout)
}

/// `ResNeXt-N`: bottleneck blocks with a grouped 3x3 conv.
///
/// Group planes are ``[16 * width, 32 * width, 64 * width]``; each group
/// has ``(n - 2) / 9`` blocks.
///
/// # Errors
///
/// When ``(n - 2) % 9 != 0``, or `cardinality` does not divide the
/// bottleneck width.
pub fn cifar_resnext(
    n: usize,
    cardinality: usize,
    width: usize,
    shortcut_type: ShortcutType,
) -> anyhow::Result<ResNetConfig> {
    if n < 11 || (n - 2) % 9 != 0 {
        bail!("ResNeXt depth must be 9 * n + 2, with n > 0: {n}");
    }
    let config = cifar_base_config(
        (n - 2) / 9,
        [16 * width, 32 * width, 64 * width],
        BlockType::Bottleneck,
        shortcut_type,
    )
    .with_cardinality(cardinality);
    config.try_validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

/// Saved weights name of the block-typed `cifar_resnet{depth}` networks.
pub fn cifar_resnet_weights_name(
    depth: usize,
    block_type: &BlockType,
) -> String {
    format!("cifar_resnet{depth}_{}", block_type.name())
}

/// A static, well-known [`ResNetConfig`].
pub struct StaticPreFab {
    /// Name of the prefab.
    pub name: &'static str,

    /// Description of the prefab.
    pub description: &'static str,

    /// Name of the saved weights, relative to a weights directory.
    pub weights_name: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> ResNetConfig,
}

impl Debug for StaticPreFab {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let mut handle = f.debug_struct("StaticPreFab");
        handle
            .field("name", &self.name)
            .field("description", &self.description)
            .field("weights_name", &self.weights_name);

        if pretty {
            handle.field("config", &self.to_config());
        }

        handle.finish()
    }
}

impl StaticPreFab {
    /// Build a new config.
    pub fn to_config(&self) -> ResNetConfig {
        (self.builder)()
    }

    /// Initialize the model, and optionally load its saved weights.
    ///
    /// Weights are read from [`DEFAULT_WEIGHTS_DIR`]; see [`load_weights`].
    pub fn init_model<B: Backend>(
        &self,
        device: &B::Device,
        load: bool,
    ) -> anyhow::Result<ResNet<B>> {
        self.init_model_from(device, load.then_some(Path::new(DEFAULT_WEIGHTS_DIR)))
    }

    /// Initialize the model, loading saved weights from `weights_dir` when present.
    pub fn init_model_from<B: Backend>(
        &self,
        device: &B::Device,
        weights_dir: Option<&Path>,
    ) -> anyhow::Result<ResNet<B>> {
        let model: ResNet<B> = self.to_config().init(device);
        match weights_dir {
            None => Ok(model),
            Some(dir) => load_weights(model, dir, self.weights_name, device),
        }
    }
}

/// A static directory of [`StaticPreFab`]s.
#[derive(Debug)]
pub struct StaticPreFabMap {
    /// Name of the directory.
    pub name: &'static str,

    /// Description of the directory.
    pub description: &'static str,

    /// The prefabs.
    pub items: &'static [&'static StaticPreFab],
}

impl StaticPreFabMap {
    /// The names of all prefabs.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|p| p.name).collect()
    }

    /// Lookup a prefab by name.
    pub fn lookup_prefab(
        &self,
        name: &str,
    ) -> Option<&'static StaticPreFab> {
        self.items.iter().find(|p| p.name == name).copied()
    }

    /// Lookup a prefab by name.
    pub fn try_lookup_prefab(
        &self,
        name: &str,
    ) -> anyhow::Result<&'static StaticPreFab> {
        match self.lookup_prefab(name) {
            Some(p) => Ok(p),
            None => bail!("PreFab not found: {name:?}; expected one of {:?}", self.names()),
        }
    }

    /// Lookup a prefab by name.
    ///
    /// # Panics
    ///
    /// If the prefab is not found.
    pub fn expect_lookup_prefab(
        &self,
        name: &str,
    ) -> &'static StaticPreFab {
        match self.try_lookup_prefab(name) {
            Ok(p) => p,
            Err(e) => panic!("{}", e),
        }
    }
}

/// Well-known CIFAR [`ResNet`] configs.
pub static PREFAB_CIFAR_RESNET_MAP: StaticPreFabMap = StaticPreFabMap {
    name: "cifar_resnet",
    description: "Well-known CIFAR ResNet configs",

    items: &[
        &StaticPreFab {
            name: "cifar_resnet20_original",
            description: "ResNet-20 [3, 3, 3] original blocks",
            weights_name: "cifar_resnet20_original",
            builder: || cifar_resnet20(BlockType::Original, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet20_preactivated",
            description: "ResNet-20 [3, 3, 3] pre-activation blocks",
            weights_name: "cifar_resnet20_preactivated",
            builder: || cifar_resnet20(BlockType::PreActivated, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet20_bottleneck",
            description: "ResNet-20 [3, 3, 3] bottleneck blocks",
            weights_name: "cifar_resnet20_bottleneck",
            builder: || cifar_resnet20(BlockType::Bottleneck, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet32_original",
            description: "ResNet-32 [5, 5, 5] original blocks",
            weights_name: "cifar_resnet32_original",
            builder: || cifar_resnet32(BlockType::Original, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet32_preactivated",
            description: "ResNet-32 [5, 5, 5] pre-activation blocks",
            weights_name: "cifar_resnet32_preactivated",
            builder: || cifar_resnet32(BlockType::PreActivated, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet44_original",
            description: "ResNet-44 [7, 7, 7] original blocks",
            weights_name: "cifar_resnet44_original",
            builder: || cifar_resnet44(BlockType::Original, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet44_preactivated",
            description: "ResNet-44 [7, 7, 7] pre-activation blocks",
            weights_name: "cifar_resnet44_preactivated",
            builder: || cifar_resnet44(BlockType::PreActivated, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet56_original",
            description: "ResNet-56 [9, 9, 9] original blocks",
            weights_name: "cifar_resnet56_original",
            builder: || cifar_resnet56(BlockType::Original, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet56_preactivated",
            description: "ResNet-56 [9, 9, 9] pre-activation blocks",
            weights_name: "cifar_resnet56_preactivated",
            builder: || cifar_resnet56(BlockType::PreActivated, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet110_original",
            description: "ResNet-110 [18, 18, 18] original blocks",
            weights_name: "cifar_resnet110_original",
            builder: || cifar_resnet110(BlockType::Original, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet110_preactivated",
            description: "ResNet-110 [18, 18, 18] pre-activation blocks",
            weights_name: "cifar_resnet110_preactivated",
            builder: || cifar_resnet110(BlockType::PreActivated, ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet164",
            description: "ResNet-164 [18, 18, 18] bottleneck blocks",
            weights_name: "cifar_resnet164",
            builder: || cifar_resnet164(ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_resnet1001",
            description: "ResNet-1001 [111, 111, 111] bottleneck blocks",
            weights_name: "cifar_resnet1001",
            builder: || cifar_resnet1001(ShortcutType::Projection),
        },
        &StaticPreFab {
            name: "cifar_wrn_16_4",
            description: "Wide ResNet-16-4",
            weights_name: "cifar_WRN_16_4",
            builder: || cifar_wrn_16_4(ShortcutType::Projection, 0.0),
        },
        &StaticPreFab {
            name: "cifar_wrn_40_4",
            description: "Wide ResNet-40-4",
            weights_name: "cifar_WRN_40_4",
            builder: || cifar_wrn_40_4(ShortcutType::Projection, 0.0),
        },
        &StaticPreFab {
            name: "cifar_wrn_16_8",
            description: "Wide ResNet-16-8",
            weights_name: "cifar_WRN_16_8",
            builder: || cifar_wrn_16_8(ShortcutType::Projection, 0.0),
        },
        &StaticPreFab {
            name: "cifar_wrn_28_10",
            description: "Wide ResNet-28-10",
            weights_name: "cifar_WRN_28_10",
            builder: || cifar_wrn_28_10(ShortcutType::Projection, 0.0),
        },
    ],
};
