//! Resting metabolic rate from anthropometrics
//!
//! Mifflin-St Jeor in kcal/day, converted to Watts and scaled up for
//! standing.

use crate::config::PipelineConfig;
use crate::types::{Gender, SubjectProfile};

/// Mifflin-St Jeor constant: +5 for men, -161 otherwise.
pub fn gender_offset(gender: Gender) -> f64 {
    match gender {
        Gender::Male => 5.0,
        Gender::Female | Gender::Other => -161.0,
    }
}

/// Resting rate in kcal/day.
pub fn resting_kcal_per_day(profile: &SubjectProfile) -> f64 {
    10.0 * profile.weight_kg + 625.0 * profile.height_m - 5.0 * profile.age_years
        + gender_offset(profile.gender)
}

/// Standing basal rate in Watts.
pub fn basal_rate(profile: &SubjectProfile, config: &PipelineConfig) -> f64 {
    resting_kcal_per_day(profile) * config.kcal_per_day_to_watts * config.stand_aug_factor
}
