use anyhow::bail;
use burn::backend::NdArray;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::ElementConversion;
use cifar_resnets::models::resnet::weights::{DEFAULT_WEIGHTS_DIR, load_weights};
use cifar_resnets::models::resnet::{PREFAB_CIFAR_RESNET_MAP, ResNet, ResNetConfig};
use clap::Parser;
use std::path::Path;

// $ --prefab=cifar_resnet56_original --batch-size=4
// $ --prefab=cifar_resnet20_preactivated --shortcut-type=A --save-config=/tmp/resnet20a.json
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// List the known prefabs and exit.
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Resnet Model Prefab
    #[arg(long, default_value = "cifar_resnet20_preactivated")]
    prefab: String,

    /// Resnet Model Config JSON file; overrides `--prefab`.
    #[arg(long)]
    config: Option<String>,

    /// Override the block type: original, preactivated or bottleneck.
    #[arg(long)]
    block_type: Option<String>,

    /// Override the shortcut type: A (padding) or B (projection).
    #[arg(long)]
    shortcut_type: Option<String>,

    /// Load the prefab's saved weights, when present.
    #[arg(long, default_value_t = false)]
    load_weights: bool,

    /// Saved weights directory.
    #[arg(long, default_value = DEFAULT_WEIGHTS_DIR)]
    weights_dir: String,

    /// Write the resolved model config to this JSON file.
    #[arg(long)]
    save_config: Option<String>,

    /// Batch size of the zero input batch.
    #[arg(short, long, default_value_t = 2)]
    batch_size: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    if args.list {
        for prefab in PREFAB_CIFAR_RESNET_MAP.items {
            println!("{:<32}{}", prefab.name, prefab.description);
        }
        return Ok(());
    }

    type B = NdArray<f32>;
    let device = Default::default();
    backend_main::<B>(&args, &device)
}

/// Resolve the config from the command line.
///
/// Returns the config and, for an unmodified prefab, its weights name.
fn resolve_config(args: &Args) -> anyhow::Result<(ResNetConfig, Option<&'static str>)> {
    let (mut config, mut weights_name) = match &args.config {
        Some(path) => {
            let config = ResNetConfig::load(path)
                .map_err(|err| anyhow::anyhow!("Failed to load config {path:?}: {err:?}"))?;
            (config, None)
        }
        None => {
            let prefab = PREFAB_CIFAR_RESNET_MAP.try_lookup_prefab(&args.prefab)?;
            (prefab.to_config(), Some(prefab.weights_name))
        }
    };

    if let Some(block_type) = &args.block_type {
        config = config.with_block_type(block_type.parse()?);
        weights_name = None;
    }
    if let Some(shortcut_type) = &args.shortcut_type {
        config = config.with_shortcut_type(shortcut_type.parse()?);
        weights_name = None;
    }

    config.try_validate().map_err(anyhow::Error::msg)?;
    Ok((config, weights_name))
}

/// Build the model and print its summary.
pub fn backend_main<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<()> {
    let (config, weights_name) = resolve_config(args)?;

    if let Some(path) = &args.save_config {
        config.save(path)?;
        tracing::info!(?path, "Saved config");
    }

    let model: ResNet<B> = config.init(device);
    let model = match (args.load_weights, weights_name) {
        (false, _) => model,
        (true, Some(name)) => load_weights(model, Path::new(&args.weights_dir), name, device)?,
        (true, None) => bail!("--load-weights requires an unmodified --prefab"),
    };

    let [channels, height, width] = config.input_shape;
    let input: Tensor<B, 4> = Tensor::zeros([args.batch_size, channels, height, width], device);
    let logits = model.forward(input);

    let penalty: f64 = model.regularization_loss().into_scalar().elem();

    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("block type:        {}", config.block_type.name());
    println!("shortcut type:     {}", config.shortcut_type.name());
    println!("weighted depth:    {}", model.weighted_depth());
    println!("blocks:            {}", model.num_blocks());
    println!("feature map:       {:?}", model.output_resolution());
    println!("parameters:        {}", model.num_params());
    println!("logits:            {:?}", logits.dims());
    println!("l2 penalty:        {penalty:.6}");

    Ok(())
}
