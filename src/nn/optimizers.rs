//! Update rules
//!
//! One rule instance serves exactly one tensor, so the moment buffers
//! below are sized lazily on the first update and never shared.

use crate::{config, optim::UpdateRule};

fn decayed(grad: &[f32], data: &[f32], weight_decay: f32) -> Vec<f32> {
    if weight_decay == 0.0 {
        return grad.to_vec();
    }
    grad.iter().zip(data).map(|(g, p)| g + weight_decay * p).collect()
}

fn state_for(buffer: &mut Option<Vec<f32>>, len: usize) -> &mut Vec<f32> {
    buffer.get_or_insert_with(|| vec![0.0; len])
}

/// Stochastic gradient descent with optional momentum, Nesterov momentum
/// and L2 weight decay
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f32,
    momentum: f32,
    nesterov: bool,
    weight_decay: f32,
    velocity: Option<Vec<f32>>,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            momentum: 0.0,
            nesterov: false,
            weight_decay: 0.0,
            velocity: None,
        }
    }

    /// Learning rate taken from the training configuration
    pub fn from_config() -> Self {
        Self::new(config::get_config().training.learning_rate)
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl UpdateRule for Sgd {
    fn apply(&mut self, data: &mut [f32], grad: &[f32]) {
        let grad = decayed(grad, data, self.weight_decay);
        if self.momentum == 0.0 {
            for (p, g) in data.iter_mut().zip(&grad) {
                *p -= self.lr * g;
            }
            return;
        }

        let (lr, mu, nesterov) = (self.lr, self.momentum, self.nesterov);
        let velocity = state_for(&mut self.velocity, data.len());
        for ((p, g), v) in data.iter_mut().zip(&grad).zip(velocity.iter_mut()) {
            *v = mu * *v + g;
            let step = if nesterov { g + mu * *v } else { *v };
            *p -= lr * step;
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "sgd"
    }

    fn reset(&mut self) {
        self.velocity = None;
    }
}

/// Adam with bias correction, optional L2 weight decay and AMSGrad
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    amsgrad: bool,
    step: i32,
    m: Option<Vec<f32>>,
    v: Option<Vec<f32>>,
    v_max: Option<Vec<f32>>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            amsgrad: false,
            step: 0,
            m: None,
            v: None,
            v_max: None,
        }
    }

    pub fn from_config() -> Self {
        Self::new(config::get_config().training.learning_rate)
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_amsgrad(mut self, amsgrad: bool) -> Self {
        self.amsgrad = amsgrad;
        self
    }

    pub fn steps(&self) -> i32 {
        self.step
    }
}

impl UpdateRule for Adam {
    fn apply(&mut self, data: &mut [f32], grad: &[f32]) {
        let grad = decayed(grad, data, self.weight_decay);
        self.step += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        let bias1 = 1.0 - b1.powi(self.step);
        let bias2 = 1.0 - b2.powi(self.step);
        let len = data.len();

        let m = state_for(&mut self.m, len);
        for (m, g) in m.iter_mut().zip(&grad) {
            *m = b1 * *m + (1.0 - b1) * g;
        }
        let v = state_for(&mut self.v, len);
        for (v, g) in v.iter_mut().zip(&grad) {
            *v = b2 * *v + (1.0 - b2) * g * g;
        }
        if self.amsgrad {
            let v_max = state_for(&mut self.v_max, len);
            if let Some(v) = &self.v {
                for (vm, v) in v_max.iter_mut().zip(v) {
                    *vm = vm.max(*v);
                }
            }
        }

        let second = if self.amsgrad { &self.v_max } else { &self.v };
        if let (Some(m), Some(v)) = (&self.m, second) {
            for ((p, m), v) in data.iter_mut().zip(m).zip(v) {
                let m_hat = m / bias1;
                let v_hat = v / bias2;
                *p -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "adam"
    }

    fn reset(&mut self) {
        self.step = 0;
        self.m = None;
        self.v = None;
        self.v_max = None;
    }
}

/// RMSProp with a decaying average of squared gradients
#[derive(Debug, Clone)]
pub struct RmsProp {
    lr: f32,
    alpha: f32,
    eps: f32,
    weight_decay: f32,
    square_avg: Option<Vec<f32>>,
}

impl RmsProp {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            alpha: 0.99,
            eps: 1e-8,
            weight_decay: 0.0,
            square_avg: None,
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl UpdateRule for RmsProp {
    fn apply(&mut self, data: &mut [f32], grad: &[f32]) {
        let grad = decayed(grad, data, self.weight_decay);
        let (lr, alpha, eps) = (self.lr, self.alpha, self.eps);
        let avg = state_for(&mut self.square_avg, data.len());
        for ((p, g), a) in data.iter_mut().zip(&grad).zip(avg.iter_mut()) {
            *a = alpha * *a + (1.0 - alpha) * g * g;
            *p -= lr * g / (a.sqrt() + eps);
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "rmsprop"
    }

    fn reset(&mut self) {
        self.square_avg = None;
    }
}

/// AdaGrad with an ever-growing sum of squared gradients
#[derive(Debug, Clone)]
pub struct AdaGrad {
    lr: f32,
    eps: f32,
    sum: Option<Vec<f32>>,
}

impl AdaGrad {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            eps: 1e-10,
            sum: None,
        }
    }
}

impl UpdateRule for AdaGrad {
    fn apply(&mut self, data: &mut [f32], grad: &[f32]) {
        let (lr, eps) = (self.lr, self.eps);
        let sum = state_for(&mut self.sum, data.len());
        for ((p, g), s) in data.iter_mut().zip(grad).zip(sum.iter_mut()) {
            *s += g * g;
            *p -= lr * g / (s.sqrt() + eps);
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "adagrad"
    }

    fn reset(&mut self) {
        self.sum = None;
    }
}
