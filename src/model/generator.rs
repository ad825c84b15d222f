use super::{
    conv::{Conv2D, Conv2DInit},
    misc::{TensorExt, LEAKY_RELU_SLOPE},
    norm::NormDescriptor,
    spade_resnet_block::{SpadeResnetBlock, SpadeResnetBlockInit},
};
use crate::{common::*, config::GeneratorConfig, error::InvalidConfiguration};

const OUTPUT_CHANNELS: usize = 3;

/// How many times the latent feature map is doubled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpsamplingMode {
    Normal,
    More,
    Most,
}

impl UpsamplingMode {
    pub fn num_stages(self) -> usize {
        match self {
            Self::Normal => 5,
            Self::More => 6,
            Self::Most => 7,
        }
    }
}

impl FromStr for UpsamplingMode {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mode = match text {
            "normal" => Self::Normal,
            "more" => Self::More,
            "most" => Self::Most,
            _ => return Err(InvalidConfiguration::new("num_upsampling_layers", text).into()),
        };
        Ok(mode)
    }
}

impl fmt::Display for UpsamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Normal => "normal",
            Self::More => "more",
            Self::Most => "most",
        };
        write!(f, "{}", text)
    }
}

/// Computes the `(width, height)` of the feature map the generator starts from.
///
/// The width is truncated by integer division when `crop_size` is not a
/// multiple of `2^stages`; the height is rounded half to even.
pub fn latent_size(crop_size: usize, aspect_ratio: R64, mode: UpsamplingMode) -> (usize, usize) {
    let sw = crop_size >> mode.num_stages();
    let sh = (sw as f64 / aspect_ratio.raw()).round_ties_even() as usize;
    (sw, sh)
}

/// One step of the generator after the head block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Upsample,
    Block(usize),
}

#[derive(Debug, Clone)]
pub struct GeneratorInit {
    pub config: GeneratorConfig,
}

impl GeneratorInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Generator> {
        let path = path.borrow();
        let Self { config } = self;

        // reject bad options before any parameter is created
        config.validate()?;
        let GeneratorConfig {
            ngf: nf,
            ref norm_g,
            semantic_nc,
            ref num_upsampling_layers,
            crop_size,
            aspect_ratio,
        } = config;
        let mode: UpsamplingMode = num_upsampling_layers.parse()?;
        let descriptor: NormDescriptor = norm_g.parse()?;

        let num_stages = mode.num_stages();
        let (sw, sh) = latent_size(crop_size, aspect_ratio, mode);
        if sw == 0 {
            return Err(InvalidConfiguration::new("crop_size", crop_size).into());
        }
        if sh == 0 {
            return Err(InvalidConfiguration::new("aspect_ratio", aspect_ratio).into());
        }
        // up_4 halves the base width
        if mode == UpsamplingMode::Most && nf < 2 {
            return Err(InvalidConfiguration::new("ngf", nf).into());
        }
        if crop_size % (1 << num_stages) != 0 {
            warn!(
                "crop_size {} is not divisible by {}, the output is truncated to {}x{}",
                crop_size,
                1 << num_stages,
                sh << num_stages,
                sw << num_stages
            );
        }

        // (name, input channels, output channels)
        let mut block_specs = vec![
            ("head_0", 16 * nf, 16 * nf),
            ("G_middle_0", 16 * nf, 16 * nf),
            ("G_middle_1", 16 * nf, 16 * nf),
            ("up_0", 16 * nf, 8 * nf),
            ("up_1", 8 * nf, 4 * nf),
            ("up_2", 4 * nf, 2 * nf),
            ("up_3", 2 * nf, nf),
        ];
        if mode == UpsamplingMode::Most {
            block_specs.push(("up_4", nf, nf / 2));
        }
        let final_nc = block_specs
            .last()
            .map(|&(_, _, out_c)| out_c)
            .unwrap_or(16 * nf);

        let fc = Conv2DInit::new(3).build(path / "fc", semantic_nc, 16 * nf)?;

        let blocks = block_specs
            .iter()
            .map(|&(name, in_c, out_c)| {
                SpadeResnetBlockInit {
                    input_channels: in_c,
                    output_channels: out_c,
                    descriptor,
                    label_channels: semantic_nc,
                    hidden_channels: 2 * nf,
                }
                .build(path / name)
            })
            .collect::<Result<Vec<_>>>()?;

        let conv_img = Conv2DInit::new(3).build(path / "conv_img", final_nc, OUTPUT_CHANNELS)?;

        let schedule = {
            let mut schedule = vec![Stage::Upsample, Stage::Block(1)];
            if matches!(mode, UpsamplingMode::More | UpsamplingMode::Most) {
                schedule.push(Stage::Upsample);
            }
            schedule.push(Stage::Block(2));
            schedule.extend(
                (3..blocks.len()).flat_map(|index| [Stage::Upsample, Stage::Block(index)]),
            );
            schedule
        };
        debug_assert_eq!(
            schedule
                .iter()
                .filter(|&&stage| stage == Stage::Upsample)
                .count(),
            num_stages
        );

        info!(
            "build generator: {} upsampling layers, norm {}, latent size {}x{}, output size {}x{}",
            mode,
            descriptor,
            sh,
            sw,
            sh << num_stages,
            sw << num_stages
        );

        Ok(Generator {
            mode,
            sw,
            sh,
            fc,
            blocks,
            schedule,
            conv_img,
        })
    }
}

/// Synthesizes an image from a semantic map.
#[derive(Debug)]
pub struct Generator {
    mode: UpsamplingMode,
    sw: usize,
    sh: usize,
    fc: Conv2D,
    /// head_0, G_middle_0, G_middle_1, up_0 ..= up_3 and optionally up_4
    blocks: Vec<SpadeResnetBlock>,
    schedule: Vec<Stage>,
    conv_img: Conv2D,
}

impl Generator {
    pub fn upsampling_mode(&self) -> UpsamplingMode {
        self.mode
    }

    pub fn num_stages(&self) -> usize {
        self.mode.num_stages()
    }

    /// The `(width, height)` of the first feature map.
    pub fn latent_size(&self) -> (usize, usize) {
        (self.sw, self.sh)
    }

    /// The `(width, height)` of the synthesized image.
    pub fn output_size(&self) -> (usize, usize) {
        let stages = self.num_stages();
        (self.sw << stages, self.sh << stages)
    }

    pub fn blocks(&self) -> &[SpadeResnetBlock] {
        &self.blocks
    }

    pub fn schedule(&self) -> &[Stage] {
        &self.schedule
    }

    /// Maps a `[B, semantic_nc, H, W]` semantic map to a `[B, 3, H', W']` image in `[-1, 1]`.
    pub fn forward_t(&mut self, segmap: &Tensor, train: bool) -> Result<Tensor> {
        let Self {
            sw,
            sh,
            ref mut fc,
            ref mut blocks,
            ref schedule,
            ref mut conv_img,
            ..
        } = *self;

        ensure!(
            segmap.dim() == 4,
            "expected a semantic map with 4 dims, got {:?}",
            segmap.size()
        );

        let xs = segmap.resize_nearest(sh as i64, sw as i64)?;
        let xs = fc.forward_t(&xs, train);
        let xs = blocks[0].forward_t(&xs, segmap, train)?;

        let xs = schedule
            .iter()
            .try_fold(xs, |xs, &stage| -> Result<_> {
                match stage {
                    Stage::Upsample => xs.upsample_2x(),
                    Stage::Block(index) => blocks[index].forward_t(&xs, segmap, train),
                }
            })?;

        let xs = conv_img.forward_t(&xs.lrelu(LEAKY_RELU_SLOPE), train).tanh();
        Ok(xs)
    }

    /// Folds the spectral normalization of every block, in construction order.
    ///
    /// Fails with [InvalidState](crate::error::InvalidState) when the
    /// generator was built without spectral normalization or when it was
    /// already removed.
    pub fn remove_spectral_norm(&mut self) -> Result<()> {
        self.blocks
            .iter_mut()
            .try_for_each(|block| block.remove_spectral_norm())
    }
}
