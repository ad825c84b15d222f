use super::{
    conv::{Conv2D, Conv2DInit},
    misc::TensorExt,
    norm::{NormDescriptor, ParamFreeNorm},
};
use crate::common::*;

/// Spatially-adaptive normalization.
///
/// The input is normalized without affine parameters and then modulated by
/// per-position scale and bias maps predicted from the semantic map.
#[derive(Debug, Clone)]
pub struct SpadeInit {
    pub descriptor: NormDescriptor,
    pub norm_channels: usize,
    pub label_channels: usize,
    pub hidden_channels: usize,
}

impl SpadeInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Spade> {
        let path = path.borrow();
        let Self {
            descriptor,
            norm_channels,
            label_channels,
            hidden_channels,
        } = self;
        let NormDescriptor { base, ksize, .. } = descriptor;

        ensure!(
            norm_channels > 0 && label_channels > 0 && hidden_channels > 0,
            "channel sizes must be positive"
        );

        let param_free_norm = base.build(path / "param_free_norm", norm_channels);
        let mlp_shared =
            Conv2DInit::new(ksize).build(path / "mlp_shared", label_channels, hidden_channels)?;
        let mlp_gamma =
            Conv2DInit::new(ksize).build(path / "mlp_gamma", hidden_channels, norm_channels)?;
        let mlp_beta =
            Conv2DInit::new(ksize).build(path / "mlp_beta", hidden_channels, norm_channels)?;

        debug!(
            "build SPADE ({}, {} channels, {} labels, {} hidden)",
            descriptor.without_spectral(),
            norm_channels,
            label_channels,
            hidden_channels
        );

        Ok(Spade {
            param_free_norm,
            mlp_shared,
            mlp_gamma,
            mlp_beta,
        })
    }
}

#[derive(Debug)]
pub struct Spade {
    param_free_norm: ParamFreeNorm,
    mlp_shared: Conv2D,
    mlp_gamma: Conv2D,
    mlp_beta: Conv2D,
}

impl Spade {
    pub fn forward_t(&mut self, input: &Tensor, segmap: &Tensor, train: bool) -> Result<Tensor> {
        let normalized = self.param_free_norm.forward_t(input, train)?;
        let (gamma, beta) = self.modulation_t(input, segmap, train)?;
        Ok(normalized * (gamma + 1.0) + beta)
    }

    /// Predicts the scale and bias maps for `input` from `segmap`.
    pub fn modulation_t(
        &mut self,
        input: &Tensor,
        segmap: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let Self {
            ref mut mlp_shared,
            ref mut mlp_gamma,
            ref mut mlp_beta,
            ..
        } = *self;

        let (_b, _c, height, width) = input.size4()?;
        let segmap = segmap.resize_nearest(height, width)?;

        let actv = mlp_shared.forward_t(&segmap, train).relu();
        let gamma = mlp_gamma.forward_t(&actv, train);
        let beta = mlp_beta.forward_t(&actv, train);

        Ok((gamma, beta))
    }
}
