//! Cypher security pipeline: tokenize, parse, validate read-only,
//! rewrite with ACL, estimate cost, cap limits. Each pass is a pure
//! function over a query string; the pipeline composes them in the
//! order the invariants require — validation and ACL rewriting must
//! both run before cost estimation and limit capping see the final
//! query shape.

pub mod acl;
pub mod ast;
pub mod cost;
pub mod templates;
pub mod tokenizer;

pub use acl::AclRewriter;
pub use cost::{estimate_cost, CostReport};
pub use templates::{match_template, template_cypher, template_hash, TemplateId};
pub use tokenizer::{tokenize_cypher, CypherToken};
pub use validator::validate_cypher_readonly;

mod validator;

use crate::config::CostEstimatorConfig;
use crate::error::Result;
use crate::model::SecurityPrincipal;

/// Full pipeline result: the rewritten, capped, cost-bounded query and
/// its bound ACL parameters, ready to execute against the graph store.
pub struct SecuredQuery {
    pub cypher: String,
    pub acl_params: std::collections::HashMap<String, String>,
    pub cost_report: CostReport,
}

/// Runs validate → ACL-rewrite → cost-estimate → limit-cap in that
/// fixed order. Any stage's rejection short-circuits the pipeline.
pub fn secure_query(
    cypher: &str,
    principal: &SecurityPrincipal,
    default_deny_untagged: bool,
    node_alias: &str,
    cost_config: &CostEstimatorConfig,
) -> Result<SecuredQuery> {
    validate_cypher_readonly(cypher)?;

    let rewriter = AclRewriter::new(principal.clone(), default_deny_untagged);
    let (rewritten, acl_params) = rewriter.inject_into_cypher(cypher, node_alias)?;

    let cost_report = estimate_cost(&rewritten, cost_config)?;

    let capped = cost::cap_limit(&rewritten, i64::from(cost_config.max_results_default));

    Ok(SecuredQuery {
        cypher: capped,
        acl_params,
        cost_report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostEstimatorConfig;

    fn cost_config() -> CostEstimatorConfig {
        CostEstimatorConfig {
            max_query_cost: 500,
            max_path_depth: 6,
            max_results_default: 50,
        }
    }

    #[test]
    fn full_pipeline_rejects_write_before_touching_acl() {
        let principal = SecurityPrincipal {
            team: "platform".to_string(),
            namespace: "*".to_string(),
            role: "viewer".to_string(),
            tenant_id: None,
        };
        let err = secure_query(
            "MATCH (n) SET n.x = 1 RETURN n",
            &principal,
            true,
            "n",
            &cost_config(),
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::OrchestratorError::CypherValidation(_)));
    }

    #[test]
    fn full_pipeline_injects_acl_and_caps_limit() {
        let principal = SecurityPrincipal {
            team: "platform".to_string(),
            namespace: "*".to_string(),
            role: "viewer".to_string(),
            tenant_id: None,
        };
        let secured = secure_query(
            "MATCH (n:Service) RETURN n LIMIT 99999",
            &principal,
            true,
            "n",
            &cost_config(),
        )
        .unwrap();
        assert!(secured.cypher.contains("n.team_owner = $acl_team"));
        assert!(secured.cypher.contains("LIMIT 50"));
        assert!(!secured.cypher.contains("99999"));
    }

    #[test]
    fn admin_principal_passes_through_unrewritten() {
        let principal = SecurityPrincipal {
            team: "*".to_string(),
            namespace: "*".to_string(),
            role: "admin".to_string(),
            tenant_id: None,
        };
        let secured = secure_query("MATCH (n) RETURN n", &principal, true, "n", &cost_config()).unwrap();
        assert!(secured.acl_params.is_empty());
    }
}
