//! Metabolic energy expenditure from pocket IMU recordings
//!
//! A phone in the trouser pocket records thigh angular velocity and
//! acceleration at an unknown orientation. Each fixed-size window is low-pass
//! filtered, rotated into the thigh frame, segmented into strides at the
//! leg-swing peaks and turned into a feature vector per stride, which a
//! regression model maps to Watts. Windows without walking fall back to the
//! subject's basal rate.

pub mod basal;
pub mod calibration;
pub mod config;
pub mod error;
pub mod estimator;
pub mod features;
pub mod filters;
pub mod gait;
pub mod models;
pub mod session;
pub mod sources;
pub mod types;
pub mod window_stream;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::PipelineConfig;
pub use error::{DataError, MetabolicsError, Result};
pub use estimator::{EnergyEstimator, FallbackReason, WindowReport};
pub use models::{load_model, Model, ModelSet};
pub use session::{process_session, ProfileStore, SampleSource, SessionContext, SessionRun};
pub use types::{Estimate, Gender, Outcome, Provenance, Sample, SubjectProfile, Window};
pub use window_stream::WindowStream;
