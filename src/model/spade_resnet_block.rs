use super::{
    conv::{Conv2D, Conv2DInit},
    misc::{TensorExt, LEAKY_RELU_SLOPE},
    norm::NormDescriptor,
    spade::{Spade, SpadeInit},
};
use crate::common::*;

/// Residual block whose normalizations are all conditioned on the semantic map.
#[derive(Debug, Clone)]
pub struct SpadeResnetBlockInit {
    pub input_channels: usize,
    pub output_channels: usize,
    pub descriptor: NormDescriptor,
    pub label_channels: usize,
    pub hidden_channels: usize,
}

impl SpadeResnetBlockInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<SpadeResnetBlock> {
        let path = path.borrow();
        let Self {
            input_channels: fin,
            output_channels: fout,
            descriptor,
            label_channels,
            hidden_channels,
        } = self;
        let learned_shortcut = fin != fout;
        let fmiddle = fin.min(fout);

        let conv_init = |ksize: usize, bias: bool| Conv2DInit {
            bias,
            spectral: descriptor.spectral.then(Default::default),
            ..Conv2DInit::new(ksize)
        };
        let spade_init = |norm_channels: usize| SpadeInit {
            descriptor: descriptor.without_spectral(),
            norm_channels,
            label_channels,
            hidden_channels,
        };

        let conv_0 = conv_init(3, true).build(path / "conv_0", fin, fmiddle)?;
        let conv_1 = conv_init(3, true).build(path / "conv_1", fmiddle, fout)?;
        let norm_0 = spade_init(fin).build(path / "norm_0")?;
        let norm_1 = spade_init(fmiddle).build(path / "norm_1")?;

        let shortcut = if learned_shortcut {
            let conv_s = conv_init(1, false).build(path / "conv_s", fin, fout)?;
            let norm_s = spade_init(fin).build(path / "norm_s")?;
            Some((norm_s, conv_s))
        } else {
            None
        };

        Ok(SpadeResnetBlock {
            fin,
            fmiddle,
            fout,
            conv_0,
            conv_1,
            norm_0,
            norm_1,
            shortcut,
        })
    }
}

#[derive(Debug)]
pub struct SpadeResnetBlock {
    fin: usize,
    fmiddle: usize,
    fout: usize,
    conv_0: Conv2D,
    conv_1: Conv2D,
    norm_0: Spade,
    norm_1: Spade,
    shortcut: Option<(Spade, Conv2D)>,
}

impl SpadeResnetBlock {
    pub fn input_channels(&self) -> usize {
        self.fin
    }

    pub fn middle_channels(&self) -> usize {
        self.fmiddle
    }

    pub fn output_channels(&self) -> usize {
        self.fout
    }

    pub fn has_learned_shortcut(&self) -> bool {
        self.shortcut.is_some()
    }

    /// The `segmap` may be at any resolution; each normalizer resizes it.
    pub fn forward_t(&mut self, input: &Tensor, segmap: &Tensor, train: bool) -> Result<Tensor> {
        let Self {
            ref mut conv_0,
            ref mut conv_1,
            ref mut norm_0,
            ref mut norm_1,
            ref mut shortcut,
            ..
        } = *self;

        let x_s = match shortcut {
            Some((norm_s, conv_s)) => {
                let xs = norm_s.forward_t(input, segmap, train)?;
                conv_s.forward_t(&xs, train)
            }
            None => input.shallow_clone(),
        };

        let dx = norm_0.forward_t(input, segmap, train)?.lrelu(LEAKY_RELU_SLOPE);
        let dx = conv_0.forward_t(&dx, train);
        let dx = norm_1.forward_t(&dx, segmap, train)?.lrelu(LEAKY_RELU_SLOPE);
        let dx = conv_1.forward_t(&dx, train);

        Ok(x_s + dx)
    }

    /// Folds the spectral normalization of every convolution into plain weights.
    pub fn remove_spectral_norm(&mut self) -> Result<()> {
        let Self {
            ref mut conv_0,
            ref mut conv_1,
            ref mut shortcut,
            ..
        } = *self;

        conv_0.remove_spectral_norm()?;
        conv_1.remove_spectral_norm()?;
        if let Some((_, conv_s)) = shortcut {
            conv_s.remove_spectral_norm()?;
        }

        Ok(())
    }
}
