//! Configuration validation.
//!
//! Every rule runs and every violation is collected, so a user sees all
//! problems of a configuration at once instead of fixing them one by one.
//!
//! # Rules
//!
//! * names used as namespaces or datasets must be plain path components
//! * `max_concurrency`, `memory_mb` and `unit_timeout_seconds` are at least 1
//! * import: raster and vector cloud datasets are mutually exclusive and
//!   both need `clouds`; `extent: region` needs a region; atmospheric
//!   correction needs its home directory; the band pattern must expand
//! * mask: threshold within [0, 100]; minimum area sizes above 0

use crate::config::consts::{MAX_THRESHOLD, MIN_THRESHOLD};
use crate::config::{Config, ExecutorOptions, PipelineConfig};
use crate::errors::ValidationError;
use crate::pipeline::{Extent, ImportSettings, MaskPipelineSettings};
use crate::temporal::BandPattern;
use crate::workspace::is_valid_name;

/// Check `config` against every rule.
///
/// # Returns
///
/// * `Ok(())` - configuration is usable
/// * `Err(Vec<ValidationError>)` - every violation found
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_name(&mut errors, "shared_namespace", &config.shared_namespace);
    validate_executor_options(&config.executor_options, &mut errors);
    match &config.pipeline {
        PipelineConfig::Import(import) => validate_import(import, &mut errors),
        PipelineConfig::Mask(mask) => validate_mask(mask, &mut errors),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_executor_options(options: &ExecutorOptions, errors: &mut Vec<ValidationError>) {
    if options.max_concurrency == Some(0) {
        errors.push(at_least_one("executor_options.max_concurrency", 0));
    }
    if options.memory_mb == Some(0) {
        errors.push(at_least_one("executor_options.memory_mb", 0));
    }
    if options.unit_timeout_seconds == Some(0) {
        errors.push(at_least_one("executor_options.unit_timeout_seconds", 0));
    }
}

fn validate_import(settings: &ImportSettings, errors: &mut Vec<ValidationError>) {
    check_name(errors, "pipeline.output", &settings.output);

    if settings.raster_clouds.is_some() && settings.vector_clouds.is_some() {
        errors.push(ValidationError::ConflictingOptions {
            first: "pipeline.raster_clouds".to_string(),
            second: "pipeline.vector_clouds".to_string(),
        });
    }
    for (option, value) in [
        ("pipeline.raster_clouds", &settings.raster_clouds),
        ("pipeline.vector_clouds", &settings.vector_clouds),
    ] {
        if let Some(name) = value {
            check_name(errors, option, name);
            if !settings.clouds {
                errors.push(ValidationError::MissingRequirement {
                    option: option.to_string(),
                    requires: "pipeline.clouds".to_string(),
                });
            }
        }
    }

    if settings.extent == Extent::Region && settings.region.is_none() {
        errors.push(ValidationError::MissingRequirement {
            option: "pipeline.extent: region".to_string(),
            requires: "pipeline.region".to_string(),
        });
    }

    if let Some(correction) = &settings.atmospheric_correction {
        if correction.sen2cor_home.as_os_str().is_empty() {
            errors.push(ValidationError::MissingRequirement {
                option: "pipeline.atmospheric_correction".to_string(),
                requires: "pipeline.atmospheric_correction.sen2cor_home".to_string(),
            });
        }
    }

    if let Some(pattern) = &settings.pattern {
        if let Err(e) = BandPattern::parse(pattern) {
            errors.push(e);
        }
    }
}

fn validate_mask(settings: &MaskPipelineSettings, errors: &mut Vec<ValidationError>) {
    check_name(errors, "pipeline.input", &settings.input);
    check_name(errors, "pipeline.output_clouds", &settings.output_clouds);
    if let Some(shadows) = &settings.output_shadows {
        check_name(errors, "pipeline.output_shadows", shadows);
        if shadows == &settings.output_clouds {
            errors.push(ValidationError::ConflictingOptions {
                first: "pipeline.output_clouds".to_string(),
                second: "pipeline.output_shadows".to_string(),
            });
        }
    }

    if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&settings.threshold) {
        errors.push(ValidationError::OutOfRange {
            option: "pipeline.threshold".to_string(),
            value: settings.threshold.to_string(),
            expected: format!("between {} and {}", MIN_THRESHOLD, MAX_THRESHOLD),
        });
    }

    for (option, value) in [
        ("pipeline.min_size_clouds", settings.min_size_clouds),
        ("pipeline.min_size_shadows", settings.min_size_shadows),
    ] {
        match value {
            Some(size) if size <= 0.0 || size.is_nan() => {
                errors.push(ValidationError::OutOfRange {
                    option: option.to_string(),
                    value: size.to_string(),
                    expected: "greater than 0".to_string(),
                });
            }
            _ => {}
        }
    }
}

fn check_name(errors: &mut Vec<ValidationError>, option: &str, value: &str) {
    if !is_valid_name(value) {
        errors.push(ValidationError::InvalidName {
            option: option.to_string(),
            value: value.to_string(),
        });
    }
}

fn at_least_one(option: &str, value: u64) -> ValidationError {
    ValidationError::OutOfRange {
        option: option.to_string(),
        value: value.to_string(),
        expected: "at least 1".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::StepPrograms;
    use crate::errors::FailureStrategy;
    use crate::pipeline::AtmosphericCorrection;
    use std::path::PathBuf;

    fn config(pipeline: PipelineConfig) -> Config {
        Config {
            location: PathBuf::from("/tmp/scenestack"),
            shared_namespace: "sentinel".to_string(),
            failure_strategy: FailureStrategy::default(),
            executor_options: ExecutorOptions::default(),
            steps: StepPrograms::default(),
            store: PathBuf::from("/tmp/scenestack/datasets"),
            pipeline,
        }
    }

    #[test]
    fn test_valid_import_config() {
        let mut import = ImportSettings::new("/data/s2", "s2");
        import.clouds = true;
        import.raster_clouds = Some("s2_cloud_raster".to_string());
        import.pattern = Some("B(02|03|04)_10m".to_string());
        assert!(validate_config(&config(PipelineConfig::Import(import))).is_ok());
    }

    #[test]
    fn test_cloud_dataset_rules_are_all_reported() {
        let mut import = ImportSettings::new("/data/s2", "s2");
        import.raster_clouds = Some("a".to_string());
        import.vector_clouds = Some("b".to_string());

        let errors = validate_config(&config(PipelineConfig::Import(import))).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], ValidationError::ConflictingOptions { .. }));
        assert!(errors[1..]
            .iter()
            .all(|e| matches!(e, ValidationError::MissingRequirement { requires, .. } if requires == "pipeline.clouds")));
    }

    #[test]
    fn test_region_extent_and_correction_home() {
        let mut import = ImportSettings::new("/data/s2", "s2");
        import.extent = Extent::Region;
        import.atmospheric_correction = Some(AtmosphericCorrection {
            sen2cor_home: PathBuf::new(),
        });
        import.pattern = Some("B(02|03".to_string());

        let errors = validate_config(&config(PipelineConfig::Import(import))).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[2], ValidationError::InvalidBandPattern { .. }));
    }

    #[test]
    fn test_mask_ranges() {
        let mut mask = MaskPipelineSettings::new("s2", "s2_clouds");
        mask.threshold = 120.0;
        mask.min_size_clouds = Some(0.0);
        mask.min_size_shadows = Some(2.5);

        let errors = validate_config(&config(PipelineConfig::Mask(mask))).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().contains("pipeline.threshold"));
        assert!(errors[1].to_string().contains("pipeline.min_size_clouds"));
    }

    #[test]
    fn test_executor_options_and_names() {
        let mut cfg = config(PipelineConfig::Mask(MaskPipelineSettings::new(
            "s2",
            "s2 clouds",
        )));
        cfg.shared_namespace = "a/b".to_string();
        cfg.executor_options.max_concurrency = Some(0);
        cfg.executor_options.memory_mb = Some(0);

        let errors = validate_config(&cfg).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(matches!(&errors[0], ValidationError::InvalidName { option, .. } if option == "shared_namespace"));
        assert!(matches!(&errors[3], ValidationError::InvalidName { value, .. } if value == "s2 clouds"));
    }
}
