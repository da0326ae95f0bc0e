//! Optimizers and learning-rate schedule.
//!
//! RMSProp, Adam and Adagrad over candle variables, with an optional
//! per-variable gradient multiplier (used to speed up or slow down the
//! character embedding relative to the rest of the network).

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Result, Tensor, TensorId, Var};
use candle_nn::Optimizer;
use charlstm_core::OptimizerKind;

const RMSPROP_DECAY: f64 = 0.9;
const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;
const ADAGRAD_INITIAL_ACCUMULATOR: f64 = 1e-8;

/// Exponential per-epoch decay: `lr · decay^epoch`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRateSchedule {
    pub base: f64,
    pub decay: f64,
}

impl LearningRateSchedule {
    pub fn new(base: f64, decay: f64) -> Self {
        Self { base, decay }
    }

    /// Rate after `epoch` completed epochs.
    pub fn rate(&self, epoch: usize) -> f64 {
        self.base * self.decay.powi(epoch as i32)
    }
}

#[derive(Debug, Clone)]
pub struct ParamsCharOptim {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    /// Gradient multipliers by variable; absent variables use 1.0.
    pub grad_scales: HashMap<TensorId, f64>,
}

impl ParamsCharOptim {
    pub fn new(kind: OptimizerKind, learning_rate: f64) -> Self {
        Self {
            kind,
            learning_rate,
            grad_scales: HashMap::new(),
        }
    }

    /// Multiply the gradient of `var` by `scale` before every update.
    pub fn with_grad_scale(mut self, var: &Var, scale: f64) -> Self {
        self.grad_scales.insert(var.as_tensor().id(), scale);
        self
    }
}

#[derive(Debug)]
struct Slot {
    var: Var,
    scale: f64,
    /// RMSProp mean square, Adam first moment, Adagrad accumulator.
    first: Var,
    /// Adam second moment.
    second: Option<Var>,
}

/// Optimizer selected by [`OptimizerKind`].
#[derive(Debug)]
pub struct CharOptim {
    slots: Vec<Slot>,
    params: ParamsCharOptim,
    step_t: usize,
}

impl Optimizer for CharOptim {
    type Config = ParamsCharOptim;

    fn new(vars: Vec<Var>, params: ParamsCharOptim) -> Result<Self> {
        let slots = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let like = var.as_tensor();
                let first = match params.kind {
                    OptimizerKind::RmsProp => Tensor::ones_like(like)?,
                    OptimizerKind::Adam => Tensor::zeros_like(like)?,
                    OptimizerKind::Adagrad => {
                        Tensor::ones_like(like)?.affine(ADAGRAD_INITIAL_ACCUMULATOR, 0.)?
                    }
                };
                let second = match params.kind {
                    OptimizerKind::Adam => Some(Var::from_tensor(&Tensor::zeros_like(like)?)?),
                    _ => None,
                };
                let scale = params
                    .grad_scales
                    .get(&var.as_tensor().id())
                    .copied()
                    .unwrap_or(1.0);
                Ok::<_, candle_core::Error>(Slot {
                    first: Var::from_tensor(&first)?,
                    second,
                    scale,
                    var,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            slots,
            params,
            step_t: 0,
        })
    }

    fn learning_rate(&self) -> f64 {
        self.params.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.learning_rate = lr;
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let lr = self.params.learning_rate;

        for slot in &self.slots {
            let Some(grad) = grads.get(slot.var.as_tensor()) else {
                continue;
            };
            let grad = if slot.scale != 1.0 {
                grad.affine(slot.scale, 0.)?
            } else {
                grad.clone()
            };

            let delta = match self.params.kind {
                OptimizerKind::RmsProp => {
                    let ms = slot
                        .first
                        .affine(RMSPROP_DECAY, 0.)?
                        .add(&grad.sqr()?.affine(1. - RMSPROP_DECAY, 0.)?)?;
                    let delta = grad.div(&ms.affine(1., EPSILON)?.sqrt()?)?.affine(lr, 0.)?;
                    slot.first.set(&ms)?;
                    delta
                }
                OptimizerKind::Adam => {
                    let Some(second) = slot.second.as_ref() else {
                        candle_core::bail!("adam slot without second moment");
                    };
                    let t = self.step_t as i32;
                    let m = slot
                        .first
                        .affine(ADAM_BETA1, 0.)?
                        .add(&grad.affine(1. - ADAM_BETA1, 0.)?)?;
                    let v = second
                        .affine(ADAM_BETA2, 0.)?
                        .add(&grad.sqr()?.affine(1. - ADAM_BETA2, 0.)?)?;
                    let lr_t = lr * (1. - ADAM_BETA2.powi(t)).sqrt() / (1. - ADAM_BETA1.powi(t));
                    let delta = m.div(&v.sqrt()?.affine(1., EPSILON)?)?.affine(lr_t, 0.)?;
                    slot.first.set(&m)?;
                    second.set(&v)?;
                    delta
                }
                OptimizerKind::Adagrad => {
                    let acc = slot.first.add(&grad.sqr()?)?;
                    let delta = grad.div(&acc.sqrt()?)?.affine(lr, 0.)?;
                    slot.first.set(&acc)?;
                    delta
                }
            };

            slot.var.set(&slot.var.sub(&delta)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    /// Minimise `sum((x - 3)^2)` and return the final x.
    fn descend(kind: OptimizerKind, lr: f64, steps: usize) -> f32 {
        let x = Var::zeros(4, DType::F32, &Device::Cpu).unwrap();
        let mut opt = CharOptim::new(vec![x.clone()], ParamsCharOptim::new(kind, lr)).unwrap();
        for _ in 0..steps {
            let loss = x.affine(1., -3.).unwrap().sqr().unwrap().sum_all().unwrap();
            opt.backward_step(&loss).unwrap();
        }
        x.to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn test_each_optimizer_descends() {
        for (kind, lr) in [
            (OptimizerKind::RmsProp, 0.05),
            (OptimizerKind::Adam, 0.1),
            (OptimizerKind::Adagrad, 0.5),
        ] {
            let x = descend(kind, lr, 200);
            assert!((x - 3.0).abs() < 0.5, "{kind}: x = {x}");
        }
    }

    #[test]
    fn test_grad_scale_zero_freezes_variable() {
        let frozen = Var::ones(3, DType::F32, &Device::Cpu).unwrap();
        let free = Var::ones(3, DType::F32, &Device::Cpu).unwrap();
        let params = ParamsCharOptim::new(OptimizerKind::RmsProp, 0.1).with_grad_scale(&frozen, 0.0);
        let mut opt = CharOptim::new(vec![frozen.clone(), free.clone()], params).unwrap();

        let loss = frozen.sum_all().unwrap().add(&free.sum_all().unwrap()).unwrap();
        opt.backward_step(&loss).unwrap();

        assert_eq!(frozen.to_vec1::<f32>().unwrap(), vec![1.0, 1.0, 1.0]);
        assert!(free.to_vec1::<f32>().unwrap().iter().all(|&v| v < 1.0));
    }

    #[test]
    fn test_first_rmsprop_step_size() {
        // ms starts at 1: ms' = 0.9 + 0.1 * g^2 with g = 1 -> 1.0, step = lr
        let x = Var::zeros(1, DType::F32, &Device::Cpu).unwrap();
        let mut opt = CharOptim::new(
            vec![x.clone()],
            ParamsCharOptim::new(OptimizerKind::RmsProp, 0.01),
        )
        .unwrap();
        opt.backward_step(&x.sum_all().unwrap()).unwrap();
        assert!((x.to_vec1::<f32>().unwrap()[0] + 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_schedule() {
        let schedule = LearningRateSchedule::new(0.1, 0.5);
        assert_eq!(schedule.rate(0), 0.1);
        assert_eq!(schedule.rate(2), 0.025);
        assert_eq!(LearningRateSchedule::new(0.3, 1.0).rate(10), 0.3);
    }

    #[test]
    fn test_learning_rate_setter() {
        let mut opt = CharOptim::new(vec![], ParamsCharOptim::new(OptimizerKind::Adam, 0.001)).unwrap();
        assert_eq!(opt.learning_rate(), 0.001);
        opt.set_learning_rate(0.0005);
        assert_eq!(opt.learning_rate(), 0.0005);
    }
}
