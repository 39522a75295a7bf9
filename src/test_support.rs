//! Synthetic walks and stand-in models shared by the unit tests

use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{LinearModel, Model, ModelSet, TreeEnsemble};
use crate::session::SessionContext;
use crate::types::{
    Gender, Sample, SubjectProfile, Window, CORRECTION_DIM_31, FEATURE_DIM_108, STRIDE_DIM_90,
};

pub const ENERGY_WATTS: f64 = 250.0;

pub fn profile() -> SubjectProfile {
    SubjectProfile::new(1.75, 70.0, 30.0, Gender::Male).unwrap()
}

/// 1 Hz thigh swing at 50 Hz, gravity on +y. Forward swing peaks at 4.5 rad/s.
pub fn walking_samples(n: usize, t0: f64) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            let phase = 2.0 * PI * (i as f64 + 0.3) / 50.0;
            Sample::new(
                t0 + i as f64 / 50.0,
                [3.0 * (phase.sin() + 0.5), 0.3 * phase.cos(), 0.0],
                [0.0, 9.81, 0.0],
            )
        })
        .collect()
}

/// Phone at rest with a little sensor noise.
pub fn stationary_samples(n: usize, t0: f64) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            let wobble = 0.002 * (i as f64 * 0.7).sin();
            Sample::new(t0 + i as f64 / 50.0, [wobble, -wobble, 0.0], [0.0, 9.81, wobble])
        })
        .collect()
}

pub fn window_of(index: u64, samples: Vec<Sample>) -> Window {
    Window { index, samples }
}

/// Small bin-dependent artifact so no corrected axis is constant.
pub fn correction_model() -> Arc<dyn Model> {
    let intercept = (0..STRIDE_DIM_90).map(|i| 0.01 * i as f64).collect();
    Arc::new(LinearModel::new(vec![vec![0.0; CORRECTION_DIM_31]; STRIDE_DIM_90], intercept).unwrap())
}

pub fn constant_model(value: f64) -> Arc<dyn Model> {
    Arc::new(TreeEnsemble::new(FEATURE_DIM_108, value, Vec::new()).unwrap())
}

/// Energy model reporting two outputs instead of one.
pub fn wide_energy_model() -> Arc<dyn Model> {
    Arc::new(LinearModel::new(vec![vec![0.0; FEATURE_DIM_108]; 2], vec![0.0; 2]).unwrap())
}

/// Correction model that returns NaN on its `poison_call`-th call (0-based).
pub struct CountingCorrection {
    inner: Arc<dyn Model>,
    calls: AtomicUsize,
    poison_call: usize,
}

impl Model for CountingCorrection {
    fn input_dim(&self) -> usize {
        self.inner.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.inner.output_dim()
    }

    fn predict(&self, input: &[f64]) -> Result<Vec<f64>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut output = self.inner.predict(input)?;
        if call == self.poison_call {
            output[0] = f64::NAN;
        }
        Ok(output)
    }
}

pub fn counting_correction(poison_call: usize) -> Arc<dyn Model> {
    Arc::new(CountingCorrection {
        inner: correction_model(),
        calls: AtomicUsize::new(0),
        poison_call,
    })
}

pub fn models(correction: Arc<dyn Model>, energy: Option<Arc<dyn Model>>) -> ModelSet {
    ModelSet::new(correction, energy.unwrap_or_else(|| constant_model(ENERGY_WATTS))).unwrap()
}

pub fn context_with_models(config: PipelineConfig, models: ModelSet) -> SessionContext {
    SessionContext::new(profile(), config, models).unwrap()
}

pub fn context(config: PipelineConfig) -> SessionContext {
    context_with_models(config, models(correction_model(), None))
}

pub fn context_with(config: PipelineConfig, energy: Arc<dyn Model>) -> SessionContext {
    context_with_models(config, models(correction_model(), Some(energy)))
}
