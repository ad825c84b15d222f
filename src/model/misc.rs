use crate::common::*;

pub const LEAKY_RELU_SLOPE: f64 = 0.2;

pub trait TensorExt {
    /// Leaky ReLU with a custom negative slope.
    fn lrelu(&self, negative_slope: f64) -> Tensor;

    /// Nearest-neighbor resize of a `[B, C, H, W]` tensor.
    fn resize_nearest(&self, height: i64, width: i64) -> Result<Tensor>;

    /// Doubles the spatial size by nearest-neighbor upsampling.
    fn upsample_2x(&self) -> Result<Tensor>;
}

impl TensorExt for Tensor {
    fn lrelu(&self, negative_slope: f64) -> Tensor {
        self.clamp_min(0.0) + self.clamp_max(0.0) * negative_slope
    }

    fn resize_nearest(&self, height: i64, width: i64) -> Result<Tensor> {
        ensure!(height > 0 && width > 0, "invalid resize to {}x{}", height, width);
        let (_b, _c, in_h, in_w) = self.size4()?;

        let output = if (in_h, in_w) == (height, width) {
            self.shallow_clone()
        } else {
            self.upsample_nearest2d(&[height, width], None::<f64>, None::<f64>)
        };
        Ok(output)
    }

    fn upsample_2x(&self) -> Result<Tensor> {
        let (_b, _c, h, w) = self.size4()?;
        Ok(self.upsample_nearest2d(&[h * 2, w * 2], 2.0, 2.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lrelu_test() -> Result<()> {
        let input = Tensor::of_slice(&[-2.0f32, -0.5, 0.0, 1.5]);
        let output = input.lrelu(LEAKY_RELU_SLOPE);
        let expect = Tensor::of_slice(&[-0.4f32, -0.1, 0.0, 1.5]);
        ensure!(output.allclose(&expect, 1e-6, 1e-6, false));
        Ok(())
    }

    #[test]
    fn resize_test() -> Result<()> {
        let input = Tensor::arange(16, FLOAT_CPU).view([1, 1, 4, 4]);

        let down = input.resize_nearest(2, 2)?;
        let expect = Tensor::of_slice(&[0f32, 2.0, 8.0, 10.0]).view([1, 1, 2, 2]);
        ensure!(down.equal(&expect), "nearest downsample picks top-left samples");

        let up = down.upsample_2x()?;
        ensure!(up.size() == vec![1, 1, 4, 4]);
        ensure!(up.double_value(&[0, 0, 1, 1]) == 0.0);
        ensure!(up.double_value(&[0, 0, 3, 3]) == 10.0);

        ensure!(input.resize_nearest(0, 4).is_err());
        ensure!(Tensor::zeros(&[4, 4], FLOAT_CPU).upsample_2x().is_err());

        Ok(())
    }
}
