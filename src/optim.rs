use ndarray::Array2;
use crate::error::{Error, Result};
use crate::model::Param;


/// Plain gradient descent, `p -= lr * grad`.
#[derive(Clone, Copy, Debug)]
pub struct Sgd {
    pub lr: f32,
}

impl Sgd {

    pub fn new(lr: f32) -> Sgd {
        Self { lr }
    }

    pub fn step(&self, params: &mut [&mut Param]) {
        for p in params.iter_mut() {
            p.value.scaled_add(-self.lr, &p.grad);
        }
    }
}


/// Learning rate and L2 penalty of one parameter group.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdamGroup {
    pub lr: f32,
    pub weight_decay: f32,
}

struct Moments {
    m: Array2<f32>,
    v: Array2<f32>,
}

/// Adam with per-group learning rates. Weight decay is added to the gradient
/// before the moment updates (L2 style, not decoupled).
pub struct Adam {
    groups: Vec<AdamGroup>,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
    state: Vec<Vec<Moments>>,
}

impl Adam {

    pub fn new(groups: Vec<AdamGroup>) -> Adam {
        let state = groups.iter().map(|_| Vec::new()).collect();
        Self { groups, beta1: 0.9, beta2: 0.999, eps: 1e-8, t: 0, state }
    }

    pub fn groups(&self) -> &[AdamGroup] {
        &self.groups
    }

    /// `params[g]` holds the parameters of group `g`, in the same order on every call.
    pub fn step(&mut self, params: Vec<Vec<&mut Param>>) -> Result<()> {

        if params.len() != self.groups.len() {
            return Err(Error::Config(format!("{} parameter groups for {} optimizer groups", params.len(), self.groups.len())));
        }

        self.t += 1;
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.eps);
        let bias_correction1 = 1.0 - beta1.powi(self.t);
        let bias_correction2 = 1.0 - beta2.powi(self.t);

        for ((group, group_params), state) in self.groups.iter().zip(params).zip(self.state.iter_mut()) {

            if state.is_empty() {
                *state = group_params.iter().map(|p| Moments {
                    m: Array2::zeros(p.value.raw_dim()),
                    v: Array2::zeros(p.value.raw_dim()),
                }).collect();
            }
            if state.len() != group_params.len() {
                return Err(Error::Config("parameter group changed size between steps".to_string()));
            }

            let step_size = group.lr / bias_correction1;
            for (p, moments) in group_params.into_iter().zip(state.iter_mut()) {
                let mut grad = p.grad.clone();
                if group.weight_decay != 0.0 {
                    grad.scaled_add(group.weight_decay, &p.value);
                }
                moments.m.zip_mut_with(&grad, |m, g| *m = beta1 * *m + (1.0 - beta1) * g);
                moments.v.zip_mut_with(&grad, |v, g| *v = beta2 * *v + (1.0 - beta2) * g * g);

                let denom = moments.v.mapv(|v| (v / bias_correction2).sqrt() + eps);
                let update = &moments.m / &denom;
                p.value.scaled_add(-step_size, &update);
            }
        }

        Ok(())
    }
}
