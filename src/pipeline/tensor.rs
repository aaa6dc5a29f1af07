use super::loader::Batch;
use burn::prelude::*;

/// A batch converted to backend tensors, ready for the model.
///
/// Shapes follow [`Batch`]; the target gains a trailing unit axis so it
/// lines up with a single-output regression head.
#[derive(Clone, Debug)]
pub struct TensorBatch<B: Backend> {
    /// `[pixels, time_steps, variables]`
    pub historical: Tensor<B, 3>,
    /// `[pixels, covariates]`
    pub current: Option<Tensor<B, 2>>,
    /// `[pixels, 1]`
    pub target: Tensor<B, 2>,
    /// `[pixels, 2]`
    pub latlons: Tensor<B, 2>,
    /// `[pixels, 12]`, float so it can feed a linear layer directly
    pub pred_month_onehot: Tensor<B, 2>,
}

impl Batch {
    /// Copy the batch into tensors on `device`
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> TensorBatch<B> {
        let pixels = self.num_pixels();
        let (_, steps, features) = self.historical.dim();

        let historical = Tensor::<B, 3>::from_data(
            TensorData::new(
                self.historical.iter().copied().collect::<Vec<f32>>(),
                [pixels, steps, features],
            ),
            device,
        );

        let current = self.current.as_ref().map(|current| {
            Tensor::<B, 2>::from_data(
                TensorData::new(
                    current.iter().copied().collect::<Vec<f32>>(),
                    [pixels, current.ncols()],
                ),
                device,
            )
        });

        let target = Tensor::<B, 2>::from_data(
            TensorData::new(self.target.to_vec(), [pixels, 1]),
            device,
        );

        let latlons = Tensor::<B, 2>::from_data(
            TensorData::new(
                self.latlons.iter().map(|v| *v as f32).collect::<Vec<f32>>(),
                [pixels, 2],
            ),
            device,
        );

        let pred_month_onehot = Tensor::<B, 2>::from_data(
            TensorData::new(
                self.pred_month_onehot.iter().copied().collect::<Vec<f32>>(),
                [pixels, 12],
            ),
            device,
        );

        TensorBatch {
            historical,
            current,
            target,
            latlons,
            pred_month_onehot,
        }
    }
}
