// src/validator.rs - Centralized validation module
use std::collections::HashMap;
use serde::Serialize;
use regex::Regex;
use lazy_static::lazy_static;
use chrono::{NaiveDate, Utc};
use crate::error::ApiError;
use crate::models::*;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^\S+@\S+\.\S+$").unwrap();
}

// ==================== VALIDATION RESULT ====================

#[derive(Debug, Default, Serialize)]
pub struct ValidationResult {
    pub errors: HashMap<String, Vec<String>>,
    pub warnings: HashMap<String, Vec<String>>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        for (field, errors) in other.errors {
            self.errors.entry(field).or_default().extend(errors);
        }
        for (field, warnings) in other.warnings {
            self.warnings.entry(field).or_default().extend(warnings);
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::InvalidFields(self.errors.clone())
    }

    /// `Ok` when there are no errors; warnings are only logged
    pub fn into_result(self) -> Result<(), ApiError> {
        for (field, warnings) in &self.warnings {
            log::debug!("Validation warning on {}: {}", field, warnings.join(", "));
        }
        if self.is_valid() {
            Ok(())
        } else {
            Err(self.to_api_error())
        }
    }
}

// ==================== FIELD VALIDATORS ====================

pub struct FieldValidator;

impl FieldValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            Err(format!("{} cannot be empty", field))
        } else {
            Ok(())
        }
    }

    pub fn email(value: &str) -> Result<(), String> {
        if EMAIL_REGEX.is_match(value.trim()) {
            Ok(())
        } else {
            Err("Invalid email format".to_string())
        }
    }

    /// Blank optional emails are treated as absent
    pub fn optional_email(value: Option<&str>) -> Result<(), String> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Self::email(v),
            _ => Ok(()),
        }
    }

    pub fn price(value: f64) -> Result<(), String> {
        if !value.is_finite() || value <= 0.0 {
            Err("Price must be greater than 0".to_string())
        } else {
            Ok(())
        }
    }

    pub fn birth_date(value: Option<NaiveDate>) -> Result<(), String> {
        match value {
            Some(date) if date > Utc::now().date_naive() => {
                Err("Birth date cannot be in the future".to_string())
            }
            _ => Ok(()),
        }
    }
}

// ==================== CUSTOM VALIDATION ====================

/// Rules the derive attributes cannot express
pub trait CustomValidate {
    fn custom_validate(&self) -> ValidationResult;
}

impl CustomValidate for CreatePatientRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = FieldValidator::not_empty(&self.last_name, "Last name") {
            result.add_error("last_name", e);
        }
        if let Err(e) = FieldValidator::not_empty(&self.first_name, "First name") {
            result.add_error("first_name", e);
        }
        if let Err(e) = FieldValidator::optional_email(self.email.as_deref()) {
            result.add_error("email", e);
        }
        if let Err(e) = FieldValidator::birth_date(self.birth_date) {
            result.add_error("birth_date", e);
        }
        if self.phone.as_deref().map(str::trim).unwrap_or("").is_empty() {
            result.add_warning("phone", "No phone number recorded");
        }

        result
    }
}

impl CustomValidate for UpdatePatientRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Some(ref v) = self.last_name {
            if let Err(e) = FieldValidator::not_empty(v, "Last name") {
                result.add_error("last_name", e);
            }
        }
        if let Some(ref v) = self.first_name {
            if let Err(e) = FieldValidator::not_empty(v, "First name") {
                result.add_error("first_name", e);
            }
        }
        if let Err(e) = FieldValidator::optional_email(self.email.as_deref()) {
            result.add_error("email", e);
        }
        if let Err(e) = FieldValidator::birth_date(self.birth_date) {
            result.add_error("birth_date", e);
        }

        result
    }
}

impl CustomValidate for CreateSampleRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = FieldValidator::not_empty(&self.specimen_type, "Specimen type") {
            result.add_error("specimen_type", e);
        }
        if self.collected_at > Utc::now() + chrono::Duration::minutes(5) {
            result.add_warning("collected_at", "Collection date is in the future");
        }

        result
    }
}

impl CustomValidate for UpdateSampleRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Some(ref v) = self.specimen_type {
            if let Err(e) = FieldValidator::not_empty(v, "Specimen type") {
                result.add_error("specimen_type", e);
            }
        }

        result
    }
}

impl CustomValidate for CreateAnalysisRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = FieldValidator::not_empty(&self.name, "Analysis name") {
            result.add_error("name", e);
        }
        if let Err(e) = FieldValidator::not_empty(&self.category, "Category") {
            result.add_error("category", e);
        }
        if let Err(e) = FieldValidator::price(self.price) {
            result.add_error("price", e);
        }

        result
    }
}

impl CustomValidate for UpdateAnalysisRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Some(ref v) = self.name {
            if let Err(e) = FieldValidator::not_empty(v, "Analysis name") {
                result.add_error("name", e);
            }
        }
        if let Some(ref v) = self.category {
            if let Err(e) = FieldValidator::not_empty(v, "Category") {
                result.add_error("category", e);
            }
        }
        if let Some(price) = self.price {
            if let Err(e) = FieldValidator::price(price) {
                result.add_error("price", e);
            }
        }

        result
    }
}

// ==================== BUSINESS VALIDATORS ====================

pub struct BusinessValidator;

impl BusinessValidator {
    /// A result entry applied on top of the stored row must leave a value in
    /// place whenever the resulting status is COMPLETED or VALIDATED.
    pub fn result_entry(existing: &SampleAnalysis, update: &UpdateResultRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        let status = update.status.unwrap_or(existing.status);
        let value = match update.result {
            Some(ref v) => Some(v.as_str()),
            None => existing.result.as_deref(),
        };
        let has_value = value.map(|v| !v.trim().is_empty()).unwrap_or(false);

        if status.requires_result() && !has_value {
            result.add_error(
                "result",
                format!("A result value is required when status is {}", status),
            );
        }

        if status == AnalysisStatus::Validated
            && existing.status == AnalysisStatus::Pending
            && update.status.is_some()
        {
            result.add_warning("status", "Validated without having been started");
        }

        result
    }

    /// A report can only be drafted once every analysis on the sample is finished.
    pub fn report_readiness(analyses: &[SampleAnalysisDetail]) -> ValidationResult {
        let mut result = ValidationResult::new();

        let unfinished: Vec<&str> = analyses
            .iter()
            .filter(|a| !a.status.is_finished())
            .map(|a| a.analysis_code.as_str())
            .collect();

        if !unfinished.is_empty() {
            result.add_error(
                "sample_id",
                format!("Analyses not finished yet: {}", unfinished.join(", ")),
            );
        }
        if analyses.is_empty() {
            result.add_warning("sample_id", "Sample has no analyses");
        }

        result
    }
}
