use crate::{common::*, error::InvalidConfiguration};
#[cfg(debug_assertions)]
use std::sync::Once;

#[cfg(debug_assertions)]
static SMALL_VARIANCE_WARN: Once = Once::new();

const SPECTRAL_MARKER: &str = "spectral";
const SPADE_PREFIX: &str = "spade";
const DEFAULT_KSIZE: usize = 3;

/// The normalizer applied before the spatially-adaptive modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseNorm {
    Instance,
    Batch,
    Positional,
}

impl BaseNorm {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>, channels: usize) -> ParamFreeNorm {
        let path = path.borrow();
        let channels = channels as i64;

        match self {
            Self::Instance => ParamFreeNorm::Instance { eps: 1e-5 },
            Self::Batch => ParamFreeNorm::Batch {
                running_mean: path.zeros_no_train("running_mean", &[channels]),
                running_var: path.ones_no_train("running_var", &[channels]),
                momentum: 0.1,
                eps: 1e-5,
            },
            Self::Positional => ParamFreeNorm::Positional { eps: 1e-5 },
        }
    }
}

impl fmt::Display for BaseNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Instance => "instance",
            Self::Batch => "batch",
            Self::Positional => "position",
        };
        write!(f, "{}", name)
    }
}

/// Parsed form of a normalization descriptor such as `spectralspadesyncbatch3x3`.
///
/// The `spectral` marker may appear anywhere and only affects convolutions.
/// The remainder reads `spade<norm>[<k>x<k>]`, where `k` is the kernel size of
/// the modulation convolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NormDescriptor {
    pub spectral: bool,
    pub base: BaseNorm,
    pub ksize: usize,
}

impl NormDescriptor {
    /// The same descriptor with the spectral marker stripped.
    pub fn without_spectral(self) -> Self {
        Self {
            spectral: false,
            ..self
        }
    }
}

impl FromStr for NormDescriptor {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::from(InvalidConfiguration::new("norm_G", text));

        let spectral = text.contains(SPECTRAL_MARKER);
        let stripped = text.replace(SPECTRAL_MARKER, "");
        let rest = stripped.strip_prefix(SPADE_PREFIX).ok_or_else(invalid)?;

        let name_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or_else(|| rest.len());
        let (name, ksize_text) = rest.split_at(name_len);

        let base = match name {
            "instance" => BaseNorm::Instance,
            "batch" | "syncbatch" => BaseNorm::Batch,
            "position" | "positional" => BaseNorm::Positional,
            _ => return Err(invalid()),
        };

        let ksize = if ksize_text.is_empty() {
            DEFAULT_KSIZE
        } else {
            let (kh, kw) = ksize_text.split_once('x').ok_or_else(invalid)?;
            let kh: usize = kh.parse().map_err(|_| invalid())?;
            let kw: usize = kw.parse().map_err(|_| invalid())?;
            if kh != kw || kh % 2 == 0 {
                return Err(invalid());
            }
            kh
        };

        Ok(Self {
            spectral,
            base,
            ksize,
        })
    }
}

impl fmt::Display for NormDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            spectral,
            base,
            ksize,
        } = *self;
        let marker = if spectral { SPECTRAL_MARKER } else { "" };
        write!(f, "{}{}{}{}x{}", marker, SPADE_PREFIX, base, ksize, ksize)
    }
}

/// Normalization without learned affine parameters.
#[derive(Debug)]
pub enum ParamFreeNorm {
    Instance {
        eps: f64,
    },
    Batch {
        running_mean: Tensor,
        running_var: Tensor,
        momentum: f64,
        eps: f64,
    },
    Positional {
        eps: f64,
    },
}

impl ParamFreeNorm {
    pub fn forward_t(&mut self, input: &Tensor, train: bool) -> Result<Tensor> {
        ensure!(
            input.dim() == 4,
            "expected an input tensor with 4 dims, got {:?}",
            input.size()
        );

        let output = match *self {
            Self::Instance { eps } => Tensor::instance_norm(
                input,
                None::<&Tensor>,
                None,
                None,
                None,
                true, // use_input_stats
                0.1,
                eps,
                false,
            ),
            Self::Batch {
                ref running_mean,
                ref running_var,
                momentum,
                eps,
            } => {
                let output = Tensor::batch_norm(
                    input,
                    None::<&Tensor>,
                    None,
                    Some(running_mean),
                    Some(running_var),
                    train,
                    momentum,
                    eps,
                    false,
                );

                #[cfg(debug_assertions)]
                {
                    let has_small_var = bool::from(running_var.abs().le(1e-15).any());
                    if has_small_var {
                        SMALL_VARIANCE_WARN.call_once(|| {
                            warn!(
                                "running variance {} is too small",
                                running_var.abs().min().double_value(&[])
                            );
                        });
                    }
                }

                output
            }
            Self::Positional { eps } => {
                let mean = input.mean_dim(&[1], true, input.kind());
                let var = input.var_dim(&[1], false, true);
                (input - mean) / (var + eps).sqrt()
            }
        };

        Ok(output)
    }
}
