use super::spectral_norm::{ConvWeight, SpectralNormInit};
use crate::common::*;

#[derive(Debug, Clone)]
pub struct Conv2DInit {
    pub ksize: usize,
    pub padding: usize,
    pub bias: bool,
    /// Wrap the weight with spectral normalization.
    pub spectral: Option<SpectralNormInit>,
    pub ws_init: nn::Init,
    pub bs_init: nn::Init,
}

impl Conv2DInit {
    pub fn new(ksize: usize) -> Self {
        Self {
            ksize,
            padding: ksize / 2,
            bias: true,
            spectral: None,
            ws_init: nn::Init::KaimingUniform,
            bs_init: nn::Init::Const(0.0),
        }
    }

    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Conv2D> {
        let Self {
            ksize,
            padding,
            bias,
            spectral,
            ws_init,
            bs_init,
        } = self;

        ensure!(ksize > 0, "kernel size must be positive");
        ensure!(in_dim > 0 && out_dim > 0, "channel sizes must be positive");

        let path = path.borrow();
        let in_dim = in_dim as i64;
        let out_dim = out_dim as i64;
        let ksize = ksize as i64;

        let bias = bias.then(|| path.var("bias", &[out_dim], bs_init));
        let weight = {
            let weight_size = [out_dim, in_dim, ksize, ksize];

            match spectral {
                Some(init) => {
                    ConvWeight::SpectralNormalized(init.build(path, &weight_size, ws_init)?)
                }
                None => ConvWeight::Plain(path.var("weight", &weight_size, ws_init)),
            }
        };

        Ok(Conv2D {
            padding: [padding as i64; 2],
            weight,
            bias,
        })
    }
}

/// Stride 1 convolution, optionally spectrally normalized.
#[derive(Debug)]
pub struct Conv2D {
    padding: [i64; 2],
    weight: ConvWeight,
    bias: Option<Tensor>,
}

impl Conv2D {
    pub fn is_spectral(&self) -> bool {
        self.weight.is_spectral()
    }

    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    pub fn remove_spectral_norm(&mut self) -> Result<()> {
        self.weight.remove_spectral_norm()
    }

    pub fn forward_t(&mut self, input: &Tensor, train: bool) -> Tensor {
        let Self {
            ref padding,
            ref mut weight,
            ref bias,
        } = *self;

        let weight = weight.weight_t(train);

        input.convolution(
            &weight,
            bias.as_ref(),
            &[1, 1], // stride
            padding,
            &[1, 1], // dilation
            false,   // transposed
            &[0, 0],
            1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidState;
    use itertools::Itertools;

    #[test]
    fn conv_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let mut conv = Conv2DInit::new(3).build(&root / "conv", 4, 6)?;
        let mut pointwise = Conv2DInit {
            bias: false,
            ..Conv2DInit::new(1)
        }
        .build(&root / "pointwise", 4, 6)?;
        ensure!(conv.has_bias() && !pointwise.has_bias());

        let input = Tensor::rand(&[2, 4, 9, 7], FLOAT_CPU);
        ensure!(conv.forward_t(&input, true).size() == vec![2, 6, 9, 7]);
        ensure!(pointwise.forward_t(&input, true).size() == vec![2, 6, 9, 7]);

        let err = conv.remove_spectral_norm().unwrap_err();
        ensure!(err.downcast_ref::<InvalidState>().is_some());

        // unpadded kernels shrink the map, padded ones keep it
        let mut valid = Conv2DInit {
            padding: 0,
            ..Conv2DInit::new(3)
        }
        .build(&root / "valid", 4, 2)?;
        ensure!(valid.forward_t(&input, false).size() == vec![2, 2, 7, 5]);
        ensure!(Conv2DInit::new(0).build(&root / "empty", 4, 2).is_err());

        Ok(())
    }

    #[test]
    fn spectral_conv_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let mut conv = Conv2DInit {
            spectral: Some(Default::default()),
            ..Conv2DInit::new(3)
        }
        .build(&root / "conv", 4, 6)?;
        ensure!(conv.is_spectral());

        let names: Vec<_> = vs.variables().into_keys().sorted().collect();
        ensure!(
            names
                == vec![
                    "conv.bias",
                    "conv.weight_orig",
                    "conv.weight_u",
                    "conv.weight_v"
                ]
        );

        let input = Tensor::rand(&[2, 4, 9, 7], FLOAT_CPU);
        let before = conv.forward_t(&input, false);
        conv.remove_spectral_norm()?;
        ensure!(!conv.is_spectral());
        let after = conv.forward_t(&input, false);

        ensure!(after.size() == vec![2, 6, 9, 7]);
        ensure!(after.allclose(&before, 1e-4, 1e-5, false));

        Ok(())
    }
}
