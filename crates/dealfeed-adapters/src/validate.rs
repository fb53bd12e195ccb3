use dealfeed_core::DealCandidate;
use serde::Serialize;

pub const MAX_DISCOUNT_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Field-level checks a candidate must pass before it may become a Deal.
pub fn validate(candidate: &DealCandidate) -> ValidationReport {
    let mut errors = Vec::new();

    if !(candidate.price > 0.0) {
        errors.push("Invalid price".to_string());
    }
    let destination = candidate
        .destination_code
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    if destination.is_none() {
        errors.push("Missing destination".to_string());
    }
    if candidate
        .discount_percent
        .is_some_and(|d| !(0.0..=MAX_DISCOUNT_PERCENT).contains(&d))
    {
        errors.push("Invalid discount percentage".to_string());
    }
    if let (Some(origin), Some(destination)) = (candidate.origin_code.as_deref(), destination) {
        if origin.trim().eq_ignore_ascii_case(destination) {
            errors.push("Origin equals destination".to_string());
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealfeed_core::{DealType, ExtractionStrategy};

    fn candidate() -> DealCandidate {
        DealCandidate {
            deal_type: DealType::Flight,
            origin_code: Some("MEX".into()),
            destination_code: Some("CUN".into()),
            price: 199.0,
            currency: "USD".into(),
            discount_percent: Some(20.0),
            original_price: None,
            is_round_trip: true,
            travel_start: None,
            travel_end: None,
            deal_url: None,
            raw_excerpt: "MEX-CUN $199".into(),
            strategy: ExtractionStrategy::PlainText,
        }
    }

    #[test]
    fn well_formed_candidate_is_valid() {
        let report = validate(&candidate());
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn every_failed_rule_is_reported() {
        let mut c = candidate();
        c.price = 0.0;
        c.destination_code = None;
        c.discount_percent = Some(95.0);
        let report = validate(&c);
        assert!(!report.valid);
        assert_eq!(
            report.errors,
            vec!["Invalid price", "Missing destination", "Invalid discount percentage"]
        );
    }

    #[test]
    fn nan_price_and_negative_discount_are_rejected() {
        let mut c = candidate();
        c.price = f64::NAN;
        c.discount_percent = Some(-1.0);
        assert_eq!(
            validate(&c).errors,
            vec!["Invalid price", "Invalid discount percentage"]
        );
    }

    #[test]
    fn discount_bounds_are_inclusive() {
        let mut c = candidate();
        c.discount_percent = Some(90.0);
        assert!(validate(&c).valid);
        c.discount_percent = Some(0.0);
        assert!(validate(&c).valid);
    }

    #[test]
    fn equal_route_codes_are_rejected() {
        let mut c = candidate();
        c.destination_code = Some("mex".into());
        assert_eq!(validate(&c).errors, vec!["Origin equals destination"]);
    }
}
