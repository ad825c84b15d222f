use crate::{common::*, error::InvalidState};

#[derive(Debug, Clone)]
pub struct SpectralNormInit {
    pub n_power_iterations: usize,
    pub warmup_iterations: usize,
    pub eps: f64,
}

impl Default for SpectralNormInit {
    fn default() -> Self {
        Self {
            n_power_iterations: 1,
            warmup_iterations: 15,
            eps: 1e-12,
        }
    }
}

impl SpectralNormInit {
    /// Registers `weight_orig` together with the `weight_u` and `weight_v`
    /// power iteration buffers under `path`.
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        weight_size: &[i64],
        ws_init: nn::Init,
    ) -> Result<SpectralNorm> {
        let path = path.borrow();
        let Self {
            n_power_iterations,
            warmup_iterations,
            eps,
        } = self;

        ensure!(
            weight_size.len() >= 2,
            "expect a weight with at least 2 dims, got {:?}",
            weight_size
        );
        ensure!(n_power_iterations > 0, "n_power_iterations must be positive");

        let height = weight_size[0];
        let width: i64 = weight_size[1..].iter().product();

        let weight_orig = path.var("weight_orig", weight_size, ws_init);
        let mut u = path.zeros_no_train("weight_u", &[height]);
        let mut v = path.zeros_no_train("weight_v", &[width]);

        tch::no_grad(|| {
            let kind = (Kind::Float, weight_orig.device());
            u.copy_(&normalize(&Tensor::randn(&[height], kind), eps));
            v.copy_(&normalize(&Tensor::randn(&[width], kind), eps));
        });

        let mut sn = SpectralNorm {
            weight_orig,
            u,
            v,
            n_power_iterations,
            eps,
        };
        sn.power_iteration(warmup_iterations);

        Ok(sn)
    }
}

/// Weight reparameterization that divides the stored weight by an estimate of
/// its largest singular value.
#[derive(Debug)]
pub struct SpectralNorm {
    weight_orig: Tensor,
    u: Tensor,
    v: Tensor,
    n_power_iterations: usize,
    eps: f64,
}

impl SpectralNorm {
    pub fn weight_t(&mut self, train: bool) -> Tensor {
        if train {
            self.power_iteration(self.n_power_iterations);
        }

        let Self {
            ref weight_orig,
            ref u,
            ref v,
            ..
        } = *self;

        // u and v are updated in place on the next training step
        let u = u.copy();
        let v = v.copy();
        weight_orig / sigma(weight_orig, &u, &v)
    }

    pub fn sigma(&self) -> f64 {
        let Self {
            ref weight_orig,
            ref u,
            ref v,
            ..
        } = *self;
        tch::no_grad(|| sigma(weight_orig, u, v).double_value(&[]))
    }

    fn power_iteration(&mut self, iterations: usize) {
        let Self {
            ref weight_orig,
            ref mut u,
            ref mut v,
            eps,
            ..
        } = *self;

        tch::no_grad(|| {
            let mat = weight_matrix(weight_orig);

            for _ in 0..iterations {
                let new_v = normalize(&mat.transpose(0, 1).mv(u), eps);
                let new_u = normalize(&mat.mv(&new_v), eps);
                v.copy_(&new_v);
                u.copy_(&new_u);
            }
        });
    }

    /// Commits the realized weight into the trainable storage and returns it.
    fn fold(&mut self) -> Tensor {
        let Self {
            ref mut weight_orig,
            ref u,
            ref v,
            ..
        } = *self;

        tch::no_grad(|| {
            let weight = &*weight_orig / sigma(weight_orig, u, v);
            weight_orig.copy_(&weight);
        });

        weight_orig.shallow_clone()
    }
}

/// Convolution weight storage, either a plain parameter or one carrying a
/// spectral normalization.
#[derive(Debug)]
pub enum ConvWeight {
    Plain(Tensor),
    SpectralNormalized(SpectralNorm),
}

impl ConvWeight {
    pub fn weight_t(&mut self, train: bool) -> Tensor {
        match self {
            Self::Plain(weight) => weight.shallow_clone(),
            Self::SpectralNormalized(sn) => sn.weight_t(train),
        }
    }

    pub fn is_spectral(&self) -> bool {
        matches!(self, Self::SpectralNormalized(_))
    }

    /// Folds the spectral normalization into a plain weight.
    ///
    /// Fails with [InvalidState] on a plain weight.
    pub fn remove_spectral_norm(&mut self) -> Result<()> {
        let weight = match self {
            Self::SpectralNormalized(sn) => sn.fold(),
            Self::Plain(_) => {
                return Err(InvalidState {
                    reason: "spectral normalization is not applied",
                }
                .into())
            }
        };
        *self = Self::Plain(weight);
        Ok(())
    }
}

fn weight_matrix(weight: &Tensor) -> Tensor {
    let height = weight.size()[0];
    weight.reshape(&[height, -1])
}

fn sigma(weight: &Tensor, u: &Tensor, v: &Tensor) -> Tensor {
    u.dot(&weight_matrix(weight).mv(v))
}

fn normalize(xs: &Tensor, eps: f64) -> Tensor {
    xs / (xs.norm() + eps)
}
