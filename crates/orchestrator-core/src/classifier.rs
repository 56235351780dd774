//! Query complexity classifier: a small regex bank, first match wins,
//! in strict priority order `AGGREGATE > MULTI_HOP > SINGLE_HOP`,
//! defaulting to `ENTITY_LOOKUP`.

use crate::model::QueryComplexity;
use regex::Regex;
use std::sync::LazyLock;

static AGGREGATE_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)most critical|top \d|count|how many|ranking|rank\b|highest|transitive.*count|by.*count")
        .unwrap()
});

// The Python original excludes `transitive` here via a negative
// lookahead guarding against the AGGREGATE phrase `transitive...count`;
// regex has no lookahead, but AGGREGATE is checked first above so the
// exclusion is already enforced by evaluation order.
static MULTI_HOP_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)blast radius|downstream|upstream|depends on|dependency chain|cascade|if.*fails|impact|indirect|transitive",
    )
    .unwrap()
});

static SINGLE_HOP_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)produce[sd]?( to)?|consume[sd]?( from)?|calls?\b|deployed in|connects? to|communicates? with")
        .unwrap()
});

/// Classifies free-text retrieval questions into a complexity tier,
/// which in turn selects the retrieval path the engine dispatches to.
#[must_use]
pub fn classify_query(query: &str) -> QueryComplexity {
    if AGGREGATE_PATTERNS.is_match(query) {
        return QueryComplexity::Aggregate;
    }
    if MULTI_HOP_PATTERNS.is_match(query) {
        return QueryComplexity::MultiHop;
    }
    if SINGLE_HOP_PATTERNS.is_match(query) {
        return QueryComplexity::SingleHop;
    }
    QueryComplexity::EntityLookup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_phrase_wins_over_multi_hop() {
        assert_eq!(
            classify_query("transitive dependency count for checkout-service"),
            QueryComplexity::Aggregate
        );
    }

    #[test]
    fn blast_radius_is_multi_hop() {
        assert_eq!(classify_query("what is the blast radius of auth-service"), QueryComplexity::MultiHop);
    }

    #[test]
    fn calls_phrase_is_single_hop() {
        assert_eq!(classify_query("what does checkout-service call"), QueryComplexity::SingleHop);
    }

    #[test]
    fn bare_entity_name_is_entity_lookup() {
        assert_eq!(classify_query("checkout-service"), QueryComplexity::EntityLookup);
    }

    #[test]
    fn how_many_is_aggregate() {
        assert_eq!(classify_query("how many services depend on postgres"), QueryComplexity::Aggregate);
    }

    #[test]
    fn downstream_impact_is_multi_hop() {
        assert_eq!(classify_query("downstream impact if postgres fails"), QueryComplexity::MultiHop);
    }
}
