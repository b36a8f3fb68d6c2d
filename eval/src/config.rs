//! Gym configuration merging.
//!
//! Applies case-specific overrides to the base gym configuration.

use anyhow::Result;
use gym::io::config::GymConfig;

use crate::case::CaseConfig;

/// Apply case configuration overrides to the base gym config.
pub fn apply_case_config(mut base: GymConfig, overrides: &CaseConfig) -> Result<GymConfig> {
    if let Some(secs) = overrides.turn_timeout_secs {
        base.session.turn_timeout_secs = secs;
    }
    if let Some(secs) = overrides.max_duration_secs {
        base.session.max_duration_secs = secs;
    }
    if let Some(secs) = overrides.kill_grace_secs {
        base.session.kill_grace_secs = secs;
    }
    if let Some(limit) = overrides.max_consecutive_noise {
        base.session.max_consecutive_noise = limit;
    }
    if let Some(ignore) = &overrides.ignore {
        base.snapshot.ignore = ignore.clone();
    }
    base.validate()?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_defaults_when_no_override() {
        let base = GymConfig::default();
        let merged = apply_case_config(base.clone(), &CaseConfig::default()).expect("merge");
        assert_eq!(merged, base);
    }

    #[test]
    fn applies_session_and_ignore_overrides() {
        let overrides = CaseConfig {
            turn_timeout_secs: Some(30),
            max_consecutive_noise: Some(2),
            ignore: Some(vec!["build".to_string()]),
            ..CaseConfig::default()
        };
        let merged = apply_case_config(GymConfig::default(), &overrides).expect("merge");
        assert_eq!(merged.session.turn_timeout_secs, 30);
        assert_eq!(merged.session.max_consecutive_noise, 2);
        assert_eq!(merged.snapshot.ignore, vec!["build"]);
        assert_eq!(
            merged.session.max_duration_secs,
            GymConfig::default().session.max_duration_secs
        );
    }

    #[test]
    fn rejects_invalid_ignore_pattern() {
        let overrides = CaseConfig {
            ignore: Some(vec!["[".to_string()]),
            ..CaseConfig::default()
        };
        let err = apply_case_config(GymConfig::default(), &overrides).expect_err("bad glob");
        assert!(format!("{err:#}").contains("snapshot.ignore"));
    }
}
