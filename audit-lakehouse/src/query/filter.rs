//! Caller-facing filter over audit events

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

/// Filter dimensions supported by both query paths
///
/// Dates are calendar days; a range is inclusive at both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub who: Option<String>,
    pub subject_id: Option<String>,
    pub subject_type: Option<String>,
    pub service: Option<String>,
    pub correlation_id: Option<String>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_date(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn with_end_date(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn with_who(mut self, who: impl Into<String>) -> Self {
        self.who = Some(who.into());
        self
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>, subject_type: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self.subject_type = Some(subject_type.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Rules an analytical query must satisfy before it is compiled
    pub fn validate(&self) -> Result<()> {
        match (self.start_date, self.end_date) {
            (None, None) => {
                return Err(AuditError::InvalidFilter(
                    "startDate or endDate must be provided".into(),
                ))
            }
            (Some(start), Some(end)) if start > end => {
                return Err(AuditError::InvalidFilter(format!(
                    "startDate {start} is after endDate {end}"
                )))
            }
            _ => {}
        }
        if self.subject_id.is_some() != self.subject_type.is_some() {
            return Err(AuditError::InvalidFilter(
                "subjectId and subjectType must be provided together".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 4, d).unwrap()
    }

    #[test]
    fn test_requires_a_date() {
        let err = AuditFilter::new().with_who("bobby.beans").validate().unwrap_err();
        assert!(matches!(err, AuditError::InvalidFilter(_)));
        assert!(AuditFilter::new().with_end_date(day(1)).validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_range() {
        let filter = AuditFilter::new().with_start_date(day(5)).with_end_date(day(1));
        assert!(filter.validate().is_err());

        let same_day = AuditFilter::new().with_start_date(day(1)).with_end_date(day(1));
        assert!(same_day.validate().is_ok());
    }

    #[test]
    fn test_subject_pair() {
        let mut filter = AuditFilter::new().with_start_date(day(1));
        filter.subject_id = Some("A1234AA".into());
        assert!(filter.validate().is_err());

        let filter = filter.with_subject("A1234AA", "PRISONER_ID");
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn test_deserializes_camel_case() {
        let filter: AuditFilter =
            serde_json::from_str(r#"{"startDate":"2021-04-01","subjectId":"x","subjectType":"y"}"#).unwrap();
        assert_eq!(filter.start_date, Some(day(1)));
        assert_eq!(filter.subject_type.as_deref(), Some("y"));
    }
}
