use dealfeed_core::{DealCandidate, ExtractionStrategy};

/// Price gap under which a plain-text candidate is taken to repeat a structured one.
pub const CROSS_STRATEGY_PRICE_TOLERANCE: f64 = 10.0;

/// Drops plain-text candidates already covered by a structured candidate on
/// the same origin/destination pair within the price tolerance.
pub fn dedup_across_strategies(candidates: Vec<DealCandidate>) -> Vec<DealCandidate> {
    let structured: Vec<(Option<String>, Option<String>, f64)> = candidates
        .iter()
        .filter(|c| c.strategy == ExtractionStrategy::Structured)
        .map(|c| (c.origin_code.clone(), c.destination_code.clone(), c.price))
        .collect();

    candidates
        .into_iter()
        .filter(|c| {
            c.strategy == ExtractionStrategy::Structured
                || !structured.iter().any(|(origin, destination, price)| {
                    *origin == c.origin_code
                        && *destination == c.destination_code
                        && (price - c.price).abs() <= CROSS_STRATEGY_PRICE_TOLERANCE
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealfeed_core::DealType;

    fn candidate(strategy: ExtractionStrategy, dest: &str, price: f64) -> DealCandidate {
        DealCandidate {
            deal_type: DealType::Flight,
            origin_code: Some("MTY".into()),
            destination_code: Some(dest.into()),
            price,
            currency: "USD".into(),
            discount_percent: None,
            original_price: None,
            is_round_trip: false,
            travel_start: None,
            travel_end: None,
            deal_url: None,
            raw_excerpt: String::new(),
            strategy,
        }
    }

    #[test]
    fn text_candidate_near_structured_price_is_dropped() {
        use ExtractionStrategy::*;
        let kept = dedup_across_strategies(vec![
            candidate(Structured, "CUN", 199.0),
            candidate(PlainText, "CUN", 205.0),
            candidate(PlainText, "CUN", 209.0),
            candidate(PlainText, "CUN", 215.0),
            candidate(PlainText, "GDL", 199.0),
        ]);
        let summary: Vec<_> = kept
            .iter()
            .map(|c| (c.strategy, c.destination_code.clone().unwrap(), c.price))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Structured, "CUN".to_string(), 199.0),
                (PlainText, "CUN".to_string(), 215.0),
                (PlainText, "GDL".to_string(), 199.0),
            ]
        );
    }

    #[test]
    fn structured_candidates_are_never_dropped() {
        use ExtractionStrategy::*;
        let kept = dedup_across_strategies(vec![
            candidate(Structured, "CUN", 199.0),
            candidate(Structured, "CUN", 201.0),
        ]);
        assert_eq!(kept.len(), 2);
    }
}
