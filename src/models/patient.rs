// src/models/patient.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use validator::Validate;

// === ENUMS ===

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
    Display, EnumString, AsRefStr, EnumIter,
)]
#[sqlx(type_name = "TEXT")]
pub enum Sex {
    #[serde(rename = "M")]
    #[sqlx(rename = "M")]
    #[strum(serialize = "M")]
    Male,
    #[serde(rename = "F")]
    #[sqlx(rename = "F")]
    #[strum(serialize = "F")]
    Female,
}

impl Sex {
    pub fn display_name_fr(&self) -> &'static str {
        match self {
            Sex::Male => "Masculin",
            Sex::Female => "Féminin",
        }
    }
}

// === PATIENT ===

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Patient {
    pub id: String,
    pub patient_code: String,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: Option<NaiveDate>,
    pub sex: Sex,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
    }

    /// Age in whole years at `on`, if the birth date is known.
    pub fn age_on(&self, on: NaiveDate) -> Option<u32> {
        self.birth_date.and_then(|birth| on.years_since(birth))
    }
}

// === REQUESTS ===

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePatientRequest {
    #[validate(length(min = 1, max = 255, message = "Last name is required"))]
    pub last_name: String,
    #[validate(length(min = 1, max = 255, message = "First name is required"))]
    pub first_name: String,
    pub birth_date: Option<NaiveDate>,
    pub sex: Sex,
    #[validate(length(max = 50, message = "Phone cannot exceed 50 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 255, message = "Email cannot exceed 255 characters"))]
    pub email: Option<String>,
    #[validate(length(max = 1000, message = "Address cannot exceed 1000 characters"))]
    pub address: Option<String>,
}

/// Partial update. The patient code is assigned once and never edited.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdatePatientRequest {
    #[validate(length(min = 1, max = 255, message = "Last name cannot be empty"))]
    pub last_name: Option<String>,
    #[validate(length(min = 1, max = 255, message = "First name cannot be empty"))]
    pub first_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<Sex>,
    #[validate(length(max = 50, message = "Phone cannot exceed 50 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 255, message = "Email cannot exceed 255 characters"))]
    pub email: Option<String>,
    #[validate(length(max = 1000, message = "Address cannot exceed 1000 characters"))]
    pub address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(birth_date: Option<NaiveDate>) -> Patient {
        Patient {
            id: "p1".to_string(),
            patient_code: "PAT000001".to_string(),
            last_name: "Camara".to_string(),
            first_name: "Aïssatou".to_string(),
            birth_date,
            sex: Sex::Female,
            phone: None,
            email: None,
            address: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sex_wire_format() {
        assert_eq!(serde_json::to_string(&Sex::Male).unwrap(), "\"M\"");
        assert_eq!(serde_json::from_str::<Sex>("\"F\"").unwrap(), Sex::Female);
        assert_eq!("M".parse::<Sex>().unwrap(), Sex::Male);
        assert_eq!(Sex::Female.to_string(), "F");
        assert_eq!(Sex::Female.display_name_fr(), "Féminin");
    }

    #[test]
    fn test_full_name_and_age() {
        let p = patient(NaiveDate::from_ymd_opt(1990, 6, 15));
        assert_eq!(p.full_name(), "Camara Aïssatou");
        assert_eq!(p.age_on(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()), Some(33));
        assert_eq!(p.age_on(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()), Some(34));
        assert_eq!(patient(None).age_on(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()), None);
    }

    #[test]
    fn test_create_request_requires_names() {
        let request = CreatePatientRequest {
            last_name: "".to_string(),
            first_name: "Mamadou".to_string(),
            birth_date: None,
            sex: Sex::Male,
            phone: None,
            email: None,
            address: None,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("last_name"));
        assert!(!errors.field_errors().contains_key("first_name"));
    }
}
