//! Validation System - Variant Rules
//!
//! Rules produce structured violations.
//! Any error-severity violation rejects the whole asset.

use serde::{Deserialize, Serialize};

use crate::profiles::TransformProfile;
use crate::transform::VariantResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub variant: Option<String>,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub profile: String,
    pub profile_version: u32,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    /// `rule[variant]: message` for every error, joined for log lines.
    pub fn error_summary(&self) -> String {
        self.violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .map(|v| match &v.variant {
                Some(key) => format!("{}[{}]: {}", v.rule, key, v.message),
                None => format!("{}: {}", v.rule, v.message),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// What the Optimize stage knows about one transformed asset.
#[derive(Debug, Clone, Copy)]
pub struct AssetOutput<'a> {
    pub source_width: u32,
    pub source_height: u32,
    pub source_has_alpha: bool,
    pub variants: &'a [VariantResult],
}

/// Validation rule trait - produces violations
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn validate(&self, output: &AssetOutput<'_>, profile: &TransformProfile) -> Vec<ValidationViolation>;
}

fn error(rule: &str, variant: &str, message: &str, expected: String, actual: String) -> ValidationViolation {
    ValidationViolation {
        rule: rule.to_string(),
        severity: ViolationSeverity::Error,
        variant: Some(variant.to_string()),
        message: message.to_string(),
        expected: Some(expected),
        actual: Some(actual),
    }
}

// --- Concrete Rules ---

/// Every VariantSpec must be produced, in its declared format.
pub struct CompletenessRule;

impl ValidationRule for CompletenessRule {
    fn name(&self) -> &'static str { "completeness" }

    fn validate(&self, output: &AssetOutput<'_>, profile: &TransformProfile) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        for spec in &profile.variants {
            match output.variants.iter().find(|v| v.key == spec.key) {
                None => violations.push(error(
                    self.name(),
                    &spec.key,
                    "Variant not produced",
                    spec.file_name(),
                    "missing".to_string(),
                )),
                Some(v) if v.format != spec.format => violations.push(error(
                    self.name(),
                    &spec.key,
                    "Variant encoded in the wrong format",
                    spec.format.extension().to_string(),
                    v.format.extension().to_string(),
                )),
                Some(_) => {}
            }
        }
        violations
    }
}

pub struct DimensionCeilingRule;

impl ValidationRule for DimensionCeilingRule {
    fn name(&self) -> &'static str { "dimension_ceiling" }

    fn validate(&self, output: &AssetOutput<'_>, profile: &TransformProfile) -> Vec<ValidationViolation> {
        output
            .variants
            .iter()
            .filter_map(|v| {
                let spec = profile.variant(&v.key)?;
                (v.width > spec.max_size_px || v.height > spec.max_size_px).then(|| {
                    error(
                        self.name(),
                        &v.key,
                        "Variant exceeds its maximum edge",
                        format!("<= {}px", spec.max_size_px),
                        format!("{}x{}", v.width, v.height),
                    )
                })
            })
            .collect()
    }
}

pub struct AlphaPreservationRule;

impl ValidationRule for AlphaPreservationRule {
    fn name(&self) -> &'static str { "alpha_preserved" }

    fn validate(&self, output: &AssetOutput<'_>, _profile: &TransformProfile) -> Vec<ValidationViolation> {
        if !output.source_has_alpha {
            return vec![];
        }
        output
            .variants
            .iter()
            .filter(|v| !v.has_alpha)
            .map(|v| {
                error(
                    self.name(),
                    &v.key,
                    "Source has alpha but variant lost it",
                    "alpha channel".to_string(),
                    "opaque".to_string(),
                )
            })
            .collect()
    }
}

pub struct NoEnlargeRule;

impl ValidationRule for NoEnlargeRule {
    fn name(&self) -> &'static str { "no_enlarge" }

    fn validate(&self, output: &AssetOutput<'_>, profile: &TransformProfile) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        for v in output.variants {
            let Some(spec) = profile.variant(&v.key) else { continue };
            let grew = v.width > output.source_width || v.height > output.source_height;
            if profile.forbid_enlarge && grew {
                violations.push(error(
                    self.name(),
                    &v.key,
                    "Variant is larger than its source",
                    format!("<= {}x{}", output.source_width, output.source_height),
                    format!("{}x{}", v.width, v.height),
                ));
            } else if output.source_width.max(output.source_height) < spec.max_size_px {
                violations.push(ValidationViolation {
                    rule: self.name().to_string(),
                    severity: ViolationSeverity::Info,
                    variant: Some(v.key.clone()),
                    message: "Source is smaller than the variant ceiling".to_string(),
                    expected: None,
                    actual: None,
                });
            }
        }
        violations
    }
}

/// Validator runs every rule against one asset
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(CompletenessRule),
                Box::new(DimensionCeilingRule),
                Box::new(AlphaPreservationRule),
                Box::new(NoEnlargeRule),
            ],
        }
    }

    pub fn validate(&self, output: &AssetOutput<'_>, profile: &TransformProfile) -> ValidationResult {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(output, profile))
            .collect();

        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        ValidationResult {
            valid,
            violations,
            profile: profile.name.clone(),
            profile_version: profile.version,
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::VariantFormat;

    fn variant(key: &str, format: VariantFormat, w: u32, h: u32, alpha: bool) -> VariantResult {
        VariantResult {
            key: key.to_string(),
            format,
            width: w,
            height: h,
            has_alpha: alpha,
            data: vec![],
        }
    }

    fn full_set(alpha: bool) -> Vec<VariantResult> {
        vec![
            variant("thumb", VariantFormat::Webp, 128, 128, alpha),
            variant("small", VariantFormat::Webp, 256, 256, alpha),
            variant("medium", VariantFormat::Webp, 512, 512, alpha),
            variant("full", VariantFormat::Png, 1024, 1024, alpha),
        ]
    }

    fn output(variants: &[VariantResult], alpha: bool) -> AssetOutput<'_> {
        AssetOutput {
            source_width: 2000,
            source_height: 2000,
            source_has_alpha: alpha,
            variants,
        }
    }

    #[test]
    fn test_complete_set_is_valid() {
        let variants = full_set(true);
        let result = Validator::new().validate(&output(&variants, true), &TransformProfile::sticker());
        assert!(result.valid, "{}", result.error_summary());
    }

    #[test]
    fn test_missing_variant_rejected() {
        let mut variants = full_set(false);
        variants.pop();
        let result = Validator::new().validate(&output(&variants, false), &TransformProfile::sticker());
        assert!(!result.valid);
        assert!(result.error_summary().contains("completeness[full]"));
    }

    #[test]
    fn test_oversized_variant_rejected() {
        let mut variants = full_set(false);
        variants[0].width = 129;
        let result = Validator::new().validate(&output(&variants, false), &TransformProfile::sticker());
        assert!(result.error_summary().contains("dimension_ceiling[thumb]"));
    }

    #[test]
    fn test_lost_alpha_rejected() {
        let mut variants = full_set(true);
        variants[2].has_alpha = false;
        let result = Validator::new().validate(&output(&variants, true), &TransformProfile::sticker());
        assert!(!result.valid);
        assert!(result.error_summary().contains("alpha_preserved[medium]"));
    }

    #[test]
    fn test_enlarged_variant_rejected() {
        let variants = vec![
            variant("thumb", VariantFormat::Webp, 100, 100, false),
            variant("small", VariantFormat::Webp, 100, 100, false),
            variant("medium", VariantFormat::Webp, 100, 100, false),
            variant("full", VariantFormat::Png, 200, 200, false),
        ];
        let out = AssetOutput {
            source_width: 100,
            source_height: 100,
            source_has_alpha: false,
            variants: &variants,
        };
        let result = Validator::new().validate(&out, &TransformProfile::sticker());
        assert!(!result.valid);
        assert!(result.error_summary().contains("no_enlarge[full]"));
        assert!(!result.error_summary().contains("no_enlarge[thumb]"));
    }

    #[test]
    fn test_small_source_is_informational() {
        let variants = vec![
            variant("thumb", VariantFormat::Webp, 100, 100, false),
            variant("small", VariantFormat::Webp, 100, 100, false),
            variant("medium", VariantFormat::Webp, 100, 100, false),
            variant("full", VariantFormat::Png, 100, 100, false),
        ];
        let out = AssetOutput {
            source_width: 100,
            source_height: 100,
            source_has_alpha: false,
            variants: &variants,
        };
        let result = Validator::new().validate(&out, &TransformProfile::sticker());
        assert!(result.valid);
        assert!(result.violations.iter().any(|v| v.severity == ViolationSeverity::Info));
    }
}
