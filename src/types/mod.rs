pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MetabolicsError, Result};

/// One synchronized IMU reading from the pocket phone.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Angular velocity, rad/s
    pub gyro: [f64; 3],
    /// Acceleration including gravity, m/s²
    pub accel: [f64; 3],
}

impl Sample {
    pub fn new(timestamp: f64, gyro: [f64; 3], accel: [f64; 3]) -> Self {
        Self { timestamp, gyro, accel }
    }

    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite()
            && self.gyro.iter().all(|v| v.is_finite())
            && self.accel.iter().all(|v| v.is_finite())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M", alias = "male", alias = "Male", alias = "m")]
    Male,
    #[serde(rename = "F", alias = "female", alias = "Female", alias = "f")]
    Female,
    #[serde(other)]
    Other,
}

/// Anthropometrics of the person carrying the phone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub height_m: f64,
    pub weight_kg: f64,
    pub age_years: f64,
    pub gender: Gender,
}

impl SubjectProfile {
    /// Build a profile, rejecting values no estimation run could use.
    pub fn new(height_m: f64, weight_kg: f64, age_years: f64, gender: Gender) -> Result<Self> {
        let profile = Self {
            height_m,
            weight_kg,
            age_years,
            gender,
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.height_m.is_finite() || self.height_m <= 0.0 {
            return Err(MetabolicsError::InvalidProfile(format!(
                "height must be a positive number of meters, got {}",
                self.height_m
            )));
        }
        if !self.weight_kg.is_finite() || self.weight_kg <= 0.0 {
            return Err(MetabolicsError::InvalidProfile(format!(
                "weight must be a positive number of kilograms, got {}",
                self.weight_kg
            )));
        }
        if !self.age_years.is_finite() || self.age_years < 0.0 {
            return Err(MetabolicsError::InvalidProfile(format!(
                "age must be a non-negative number of years, got {}",
                self.age_years
            )));
        }
        Ok(())
    }
}

/// Fixed-length run of consecutive samples, numbered in stream order.
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    pub index: u64,
    pub samples: Vec<Sample>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn start_time(&self) -> Option<f64> {
        self.samples.first().map(|s| s.timestamp)
    }

    pub fn end_time(&self) -> Option<f64> {
        self.samples.last().map(|s| s.timestamp)
    }
}

/// One page handed back by a paginated sample source.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub samples: Vec<Sample>,
    /// `None` means the source has no more data.
    pub next_token: Option<String>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next_token.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    #[serde(rename = "model")]
    Model,
    #[serde(rename = "basal-fallback")]
    BasalFallback,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Model => write!(f, "model"),
            Provenance::BasalFallback => write!(f, "basal-fallback"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub timestamp: f64,
    /// Watts; `None` when the value was non-finite and has been flagged
    pub energy_watts: Option<f64>,
    pub provenance: Provenance,
    pub window_index: u64,
    pub stride_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-entry result of the pipeline. Fatal conditions are carried as `Err` instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "estimate", rename_all = "snake_case")]
pub enum Outcome {
    Ok(Estimate),
    Fallback(Estimate),
    Flagged(Estimate),
}

impl Outcome {
    pub fn estimate(&self) -> &Estimate {
        match self {
            Outcome::Ok(e) | Outcome::Fallback(e) | Outcome::Flagged(e) => e,
        }
    }

    pub fn energy_watts(&self) -> Option<f64> {
        self.estimate().energy_watts
    }

    pub fn is_flagged(&self) -> bool {
        matches!(self, Outcome::Flagged(_))
    }
}
