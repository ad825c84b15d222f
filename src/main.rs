use anyhow::Result;
use spade_generator::{
    common::*,
    config::{Config, GeneratorConfig},
    model::GeneratorInit,
};
use std::env;
use structopt::StructOpt;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, StructOpt)]
/// Synthesize an image from a random semantic map with a SPADE generator.
pub struct Args {
    #[structopt(long, default_value = "config.json5")]
    pub config: PathBuf,
    /// Save the synthesized image tensor to this file.
    #[structopt(long)]
    pub output: Option<PathBuf>,
    /// Fold spectral normalization into plain weights before synthesis.
    #[structopt(long)]
    pub remove_spectral_norm: bool,
}

fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    // parse config
    let Args {
        config,
        output,
        remove_spectral_norm,
    } = Args::from_args();
    let Config {
        generator: generator_config,
        device,
        batch_size,
        weights_file,
    } = Config::load(&config)?;
    let GeneratorConfig {
        semantic_nc,
        crop_size,
        aspect_ratio,
        ..
    } = generator_config;

    // build model
    let mut vs = nn::VarStore::new(device);
    let mut generator = GeneratorInit {
        config: generator_config,
    }
    .build(vs.root())?;

    if let Some(weights_file) = weights_file {
        let missing = vs
            .load_partial(&weights_file)
            .with_context(|| format!("unable to load '{}'", weights_file.display()))?;
        if !missing.is_empty() {
            warn!("{} variables are missing in the weights file", missing.len());
        }
    }

    let num_params: usize = vs
        .trainable_variables()
        .iter()
        .map(|param| param.numel())
        .sum();
    info!("{} trainable parameters", num_params);

    if remove_spectral_norm {
        generator.remove_spectral_norm()?;
        info!("spectral normalization removed");
    }

    // random one-hot semantic map
    let height = (crop_size as f64 / aspect_ratio.raw()).round() as i64;
    let width = crop_size as i64;
    let segmap = {
        let labels = Tensor::randint(
            semantic_nc as i64,
            &[batch_size.get() as i64, height, width],
            (Kind::Int64, device),
        );
        labels
            .one_hot(semantic_nc as i64)
            .permute(&[0, 3, 1, 2])
            .to_kind(Kind::Float)
    };

    let image = tch::no_grad(|| generator.forward_t(&segmap, false))?;
    info!(
        "synthesized {:?}, value range [{:.4}, {:.4}]",
        image.size(),
        image.min().double_value(&[]),
        image.max().double_value(&[])
    );

    if let Some(output) = output {
        image.save(&output)?;
        info!("saved to '{}'", output.display());
    }

    Ok(())
}
