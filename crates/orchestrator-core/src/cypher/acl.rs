//! ACL rewriter: injects a principal-scoped predicate at every MATCH
//! scope and verifies full coverage on the rewritten output.

use super::ast::{inject_acl_all_scopes, validate_acl_coverage};
use crate::error::{OrchestratorError, Result};
use crate::model::SecurityPrincipal;
use std::collections::HashMap;

pub struct AclRewriter {
    principal: SecurityPrincipal,
    default_deny_untagged: bool,
    verify_coverage: bool,
}

impl AclRewriter {
    #[must_use]
    pub fn new(principal: SecurityPrincipal, default_deny_untagged: bool) -> Self {
        Self {
            principal,
            default_deny_untagged,
            verify_coverage: true,
        }
    }

    #[must_use]
    pub fn without_coverage_verification(mut self) -> Self {
        self.verify_coverage = false;
        self
    }

    /// The ACL predicate (and its bound parameters) for node alias
    /// `alias`. Empty clause for an admin principal.
    #[must_use]
    pub fn node_filter(&self, alias: &str) -> (String, HashMap<String, String>) {
        if self.principal.is_admin() {
            return (String::new(), HashMap::new());
        }

        let mut clauses = Vec::new();
        let mut params = HashMap::new();

        if self.principal.team != "*" {
            if self.default_deny_untagged {
                clauses.push(format!("({alias}.team_owner = $acl_team)"));
            } else {
                clauses.push(format!(
                    "({alias}.team_owner = $acl_team OR {alias}.team_owner IS NULL)"
                ));
            }
            params.insert("acl_team".to_string(), self.principal.team.clone());
        }

        if self.principal.namespace != "*" {
            if self.default_deny_untagged {
                clauses.push(format!("($acl_namespace IN {alias}.namespace_acl)"));
            } else {
                clauses.push(format!(
                    "($acl_namespace IN {alias}.namespace_acl OR {alias}.namespace_acl IS NULL)"
                ));
            }
            params.insert(
                "acl_namespace".to_string(),
                self.principal.namespace.clone(),
            );
        }

        if clauses.is_empty() {
            if self.default_deny_untagged {
                clauses.push(format!("({alias}.team_owner = $acl_team)"));
            } else {
                clauses.push(format!(
                    "({alias}.team_owner = $acl_team OR {alias}.team_owner IS NULL)"
                ));
            }
            params.insert("acl_team".to_string(), "public".to_string());
        }

        if !self.principal.role.is_empty() && self.principal.role != "anonymous" {
            clauses.push(format!("($acl_role IN {alias}.read_roles)"));
            params.insert("acl_role".to_string(), self.principal.role.clone());
        }

        (clauses.join(" AND "), params)
    }

    /// Rewrites `cypher` to inject the ACL predicate at every MATCH
    /// scope, then verifies coverage unless disabled. Returns the
    /// rewritten query and its bound ACL parameters.
    pub fn inject_into_cypher(&self, cypher: &str, alias: &str) -> Result<(String, HashMap<String, String>)> {
        if self.principal.is_admin() {
            return Ok((cypher.to_string(), HashMap::new()));
        }

        let (node_clause, params) = self.node_filter(alias);
        if node_clause.is_empty() {
            return Ok((cypher.to_string(), HashMap::new()));
        }

        let rewritten = inject_acl_all_scopes(cypher, &node_clause);

        if self.verify_coverage {
            let marker = acl_marker(&node_clause);
            if !validate_acl_coverage(&rewritten, &marker) {
                return Err(OrchestratorError::AclCoverage);
            }
        }

        Ok((rewritten, params))
    }
}

/// The property name to the left of the first `=` in the injected
/// condition, used as the coverage verifier's witness string.
fn acl_marker(node_clause: &str) -> String {
    let before_eq = node_clause.split('=').next().unwrap_or(node_clause);
    before_eq
        .trim()
        .trim_start_matches('(')
        .rsplit('.')
        .next()
        .unwrap_or(before_eq)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(team: &str, namespace: &str, role: &str) -> SecurityPrincipal {
        SecurityPrincipal {
            team: team.to_string(),
            namespace: namespace.to_string(),
            role: role.to_string(),
            tenant_id: None,
        }
    }

    #[test]
    fn admin_skips_injection() {
        let rewriter = AclRewriter::new(principal("*", "*", "admin"), true);
        let (clause, params) = rewriter.node_filter("n");
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn team_scoped_principal_produces_team_owner_clause() {
        let rewriter = AclRewriter::new(principal("platform", "*", "viewer"), true);
        let (clause, params) = rewriter.node_filter("n");
        assert!(clause.contains("n.team_owner = $acl_team"));
        assert_eq!(params.get("acl_team").unwrap(), "platform");
    }

    #[test]
    fn wildcard_team_with_deny_untagged_falls_back_to_public() {
        let rewriter = AclRewriter::new(principal("*", "*", "viewer"), true);
        let (clause, params) = rewriter.node_filter("n");
        assert!(clause.contains("n.team_owner = $acl_team"));
        assert_eq!(params.get("acl_team").unwrap(), "public");
    }

    #[test]
    fn role_scoped_user_adds_read_roles_predicate() {
        let rewriter = AclRewriter::new(principal("platform", "*", "viewer"), true);
        let (clause, params) = rewriter.node_filter("n");
        assert!(clause.contains("$acl_role IN n.read_roles"));
        assert_eq!(params.get("acl_role").unwrap(), "viewer");
    }

    #[test]
    fn coverage_verified_across_union_and_subquery() {
        let q = "MATCH (n:Service) CALL { CALL { MATCH (m) RETURN m } RETURN m } RETURN n UNION MATCH (k:Service) RETURN k";
        let rewriter = AclRewriter::new(principal("platform", "*", "viewer"), true);
        let (rewritten, params) = rewriter.inject_into_cypher(q, "n").unwrap();
        assert!(rewritten.contains("n.team_owner = $acl_team"));
        assert_eq!(params.get("acl_team").unwrap(), "platform");
    }

    #[test]
    fn admin_inject_is_a_no_op() {
        let q = "MATCH (n) RETURN n";
        let rewriter = AclRewriter::new(principal("*", "*", "admin"), true);
        let (rewritten, params) = rewriter.inject_into_cypher(q, "n").unwrap();
        assert_eq!(rewritten, q);
        assert!(params.is_empty());
    }
}
