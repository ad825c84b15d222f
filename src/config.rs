use crate::{common::*, error::InvalidConfiguration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub generator: GeneratorConfig,
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    pub batch_size: NonZeroUsize,
    #[serde(default)]
    pub weights_file: Option<PathBuf>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)?;
        Ok(config)
    }
}

/// Options consumed by the generator.
///
/// The string-valued fields are parsed when the generator is built, so an
/// unknown value surfaces as [InvalidConfiguration] rather than a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base channel width.
    pub ngf: usize,
    /// Normalization descriptor, e.g. `spectralspadeinstance3x3`.
    #[serde(rename = "norm_G")]
    pub norm_g: String,
    /// Number of channels of the semantic map.
    pub semantic_nc: usize,
    /// One of `normal`, `more` or `most`.
    pub num_upsampling_layers: String,
    pub crop_size: usize,
    pub aspect_ratio: R64,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        let Self {
            ngf,
            semantic_nc,
            crop_size,
            aspect_ratio,
            ..
        } = *self;

        if ngf == 0 {
            return Err(InvalidConfiguration::new("ngf", ngf).into());
        }
        if semantic_nc == 0 {
            return Err(InvalidConfiguration::new("semantic_nc", semantic_nc).into());
        }
        if crop_size == 0 {
            return Err(InvalidConfiguration::new("crop_size", crop_size).into());
        }
        if aspect_ratio.raw() <= 0.0 {
            return Err(InvalidConfiguration::new("aspect_ratio", aspect_ratio).into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parse_test() -> Result<()> {
        let text = r#"{
            generator: {
                ngf: 64,
                norm_G: "spectralspadesyncbatch3x3",
                semantic_nc: 35,
                num_upsampling_layers: "normal",
                crop_size: 256,
                aspect_ratio: 2.0,
            },
            device: "cpu",
            batch_size: 4,
        }"#;

        let config: Config = json5::from_str(text)?;
        let GeneratorConfig {
            ngf,
            ref norm_g,
            semantic_nc,
            ref num_upsampling_layers,
            crop_size,
            aspect_ratio,
        } = config.generator;

        ensure!(ngf == 64 && semantic_nc == 35 && crop_size == 256);
        ensure!(norm_g == "spectralspadesyncbatch3x3");
        ensure!(num_upsampling_layers == "normal");
        ensure!(aspect_ratio.raw() == 2.0);
        ensure!(config.device == Device::Cpu);
        ensure!(config.batch_size.get() == 4);
        ensure!(config.weights_file.is_none());
        config.generator.validate()?;

        Ok(())
    }

    #[test]
    fn config_validate_test() -> Result<()> {
        let config = GeneratorConfig {
            ngf: 0,
            norm_g: "spadeinstance3x3".into(),
            semantic_nc: 3,
            num_upsampling_layers: "normal".into(),
            crop_size: 64,
            aspect_ratio: r64(1.0),
        };

        let err = config.validate().unwrap_err();
        let err = err
            .downcast_ref::<InvalidConfiguration>()
            .ok_or_else(|| format_err!("expect InvalidConfiguration"))?;
        ensure!(err.field == "ngf");

        Ok(())
    }
}
