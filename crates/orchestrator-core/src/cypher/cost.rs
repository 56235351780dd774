//! Cost estimator and LIMIT capper: a separate AST pass that bounds
//! query cost, rejects unbounded variable-length paths and excessive
//! path depth, caps every LIMIT, and rejects the amplification
//! (`WITH … LIMIT` followed by `UNWIND`) pattern.

use super::ast::{has_amplification, inject_limit_ast, parse, Clause};
use crate::config::CostEstimatorConfig;
use crate::error::{OrchestratorError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Per-hop cost weight for a bounded variable-length relationship.
const EDGE_FACTOR: u32 = 10;
const MATCH_WEIGHT: u32 = 5;
const DEPTH_WEIGHT: u32 = 15;

static VAR_LENGTH_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\[\]]*\*[^\[\]]*\]").unwrap());

static VAR_LENGTH_SPEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\s*(?P<a>\d+)?\s*(?P<dots>\.\.)?\s*(?P<b>\d+)?").unwrap());

#[derive(Debug, Clone, serde::Serialize)]
pub struct CostReport {
    pub cost: u32,
    pub match_count: u32,
    pub max_subquery_depth: u32,
}

/// A bounded `a..b` (or exact-length) variable-length path spec. `None`
/// bound on either side marks an unbounded path, rejected outright.
struct PathBound {
    upper: Option<u32>,
}

fn variable_length_paths(cypher: &str) -> Result<Vec<PathBound>> {
    let mut bounds = Vec::new();
    for bracket in VAR_LENGTH_BRACKET.find_iter(cypher) {
        let caps = VAR_LENGTH_SPEC
            .captures(bracket.as_str())
            .ok_or_else(|| OrchestratorError::CypherValidation("malformed variable-length path".into()))?;
        let a: Option<u32> = caps.name("a").and_then(|m| m.as_str().parse().ok());
        let has_dots = caps.name("dots").is_some();
        let b: Option<u32> = caps.name("b").and_then(|m| m.as_str().parse().ok());

        let upper = match (a, has_dots, b) {
            (None, false, None) => None, // bare `*` — fully unbounded
            (Some(a), false, None) => Some(a), // exact length `*a`
            (None, true, Some(b)) => Some(b), // `*..b`
            (Some(_), true, None) => None, // `*a..` — unbounded upper
            (Some(_), true, Some(b)) => Some(b), // `*a..b`
            (None, true, None) => None, // `*..` — unbounded
        };

        if upper.is_none() {
            return Err(OrchestratorError::CypherValidation(
                "unbounded variable-length path is not allowed".to_string(),
            ));
        }
        bounds.push(PathBound { upper });
    }
    Ok(bounds)
}

fn count_matches_and_depth(clauses: &[Clause]) -> (u32, u32) {
    let mut match_count = 0;
    let mut max_depth = 0;
    for clause in clauses {
        match clause {
            Clause::Match { .. } => match_count += 1,
            Clause::CallSubquery { body, .. } if !body.is_empty() => {
                let (inner_count, inner_depth) = count_matches_and_depth(body);
                match_count += inner_count;
                max_depth = max_depth.max(inner_depth + 1);
            }
            Clause::UnionQuery { branches, .. } => {
                for branch in branches {
                    let (inner_count, inner_depth) = count_matches_and_depth(branch);
                    match_count += inner_count;
                    max_depth = max_depth.max(inner_depth);
                }
            }
            _ => {}
        }
    }
    (match_count, max_depth)
}

/// Computes the integer cost score and rejects queries whose path depth
/// or total cost exceeds the configured maxima.
pub fn estimate_cost(cypher: &str, config: &CostEstimatorConfig) -> Result<CostReport> {
    let ast = parse(cypher);
    let (match_count, max_subquery_depth) = count_matches_and_depth(&ast.clauses);

    let path_bounds = variable_length_paths(cypher)?;
    let mut path_cost = 0u32;
    let mut max_path_depth = 0u32;
    for bound in &path_bounds {
        if let Some(upper) = bound.upper {
            path_cost += upper.saturating_mul(EDGE_FACTOR);
            max_path_depth = max_path_depth.max(upper);
        }
    }

    if max_path_depth > config.max_path_depth {
        return Err(OrchestratorError::CypherValidation(format!(
            "path depth {max_path_depth} exceeds maximum {}",
            config.max_path_depth
        )));
    }

    let cost = match_count * MATCH_WEIGHT + path_cost + max_subquery_depth * DEPTH_WEIGHT;
    if cost > config.max_query_cost {
        return Err(OrchestratorError::CypherValidation(format!(
            "query cost {cost} exceeds maximum {}",
            config.max_query_cost
        )));
    }

    if has_amplification(cypher) {
        return Err(OrchestratorError::CypherValidation(
            "query contains a row-amplification pattern".to_string(),
        ));
    }

    Ok(CostReport {
        cost,
        match_count,
        max_subquery_depth,
    })
}

/// Caps every LIMIT at `max_results` (appending one if absent). Must
/// run only after [`estimate_cost`] has rejected amplification and
/// unbounded paths.
pub fn cap_limit(cypher: &str, max_results: i64) -> String {
    inject_limit_ast(cypher, max_results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CostEstimatorConfig {
        CostEstimatorConfig {
            max_query_cost: 500,
            max_path_depth: 6,
            max_results_default: 100,
        }
    }

    #[test]
    fn unbounded_variable_length_path_is_rejected() {
        let q = "MATCH (n)-[:CALLS*]->(m) RETURN m";
        assert!(estimate_cost(q, &config()).is_err());
    }

    #[test]
    fn bounded_variable_length_path_is_accepted() {
        let q = "MATCH (n)-[:CALLS*1..3]->(m) RETURN m";
        assert!(estimate_cost(q, &config()).is_ok());
    }

    #[test]
    fn path_depth_over_maximum_is_rejected() {
        let q = "MATCH (n)-[:CALLS*1..20]->(m) RETURN m";
        assert!(estimate_cost(q, &config()).is_err());
    }

    #[test]
    fn amplification_is_rejected_by_cost_pass() {
        let q = "MATCH (n) WITH n LIMIT 10 UNWIND range(1,1000000) AS x RETURN n, x";
        assert!(estimate_cost(q, &config()).is_err());
    }

    #[test]
    fn simple_query_has_low_cost() {
        let report = estimate_cost("MATCH (n:Service) RETURN n", &config()).unwrap();
        assert_eq!(report.match_count, 1);
        assert!(report.cost < 50);
    }
}
