// Objective and optimizer seams used by `CtcModel::compile`.
//
// The Train head already emits the per-example CTC loss, so the objective
// the optimizer minimises is the head's output itself (`Passthrough`).
// `ModelOptimizer` erases the concrete Burn optimizer type so a compiled
// model can hold any of them behind one box.

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

/// Turns a (truth, prediction) pair into the per-example values the
/// optimizer minimises.
pub trait Objective<B: Backend>: Send + Sync {
    fn compute(&self, y_true: Option<Tensor<B, 1>>, y_pred: Tensor<B, 1>) -> Tensor<B, 1>;
}

/// Returns the prediction unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl<B: Backend> Objective<B> for Passthrough {
    fn compute(&self, _y_true: Option<Tensor<B, 1>>, y_pred: Tensor<B, 1>) -> Tensor<B, 1> {
        y_pred
    }
}

/// Object-safe view of a Burn optimizer bound to one module type.
pub trait ModelOptimizer<B: AutodiffBackend, M: AutodiffModule<B>>: Send {
    fn step(&mut self, learning_rate: f64, module: M, grads: GradientsParams) -> M;
}

impl<B, M, O> ModelOptimizer<B, M> for O
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fn step(&mut self, learning_rate: f64, module: M, grads: GradientsParams) -> M {
        Optimizer::step(self, learning_rate, module, grads)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    #[test]
    fn test_passthrough_ignores_truth() {
        let device = Default::default();
        let pred   = Tensor::<NdArray, 1>::from_data(TensorData::new(vec![1.5f32, 2.5], [2]), &device);
        let truth  = Tensor::<NdArray, 1>::zeros([2], &device);

        let out: Vec<f32> = Passthrough
            .compute(Some(truth), pred)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .unwrap();
        assert_eq!(out, vec![1.5, 2.5]);
    }
}
