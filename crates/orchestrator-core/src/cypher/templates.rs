//! Catalog of pre-approved Cypher templates for the common retrieval
//! questions. Each template is a parameterized, read-only query whose
//! text is frozen — callers bind parameters, never interpolate text —
//! and whose whitespace-normalized hash is recorded so a template
//! string cannot drift from what was reviewed without the hash check
//! failing.

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TemplateId {
    BlastRadius,
    DependencyCount,
    ServiceNeighbors,
    TopicConsumers,
    TopicProducers,
    ServiceDeployments,
    CrossTeamDependencies,
}

impl TemplateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::BlastRadius => "blast_radius",
            TemplateId::DependencyCount => "dependency_count",
            TemplateId::ServiceNeighbors => "service_neighbors",
            TemplateId::TopicConsumers => "topic_consumers",
            TemplateId::TopicProducers => "topic_producers",
            TemplateId::ServiceDeployments => "service_deployments",
            TemplateId::CrossTeamDependencies => "cross_team_dependencies",
        }
    }
}

pub struct QueryTemplate {
    pub id: TemplateId,
    pub cypher: &'static str,
    matcher: Regex,
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 of the whitespace-normalized template text, used to detect
/// drift between the reviewed template and what is actually executed.
pub fn template_hash(cypher: &str) -> String {
    let normalized = normalize_whitespace(cypher);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

static TEMPLATES: LazyLock<Vec<QueryTemplate>> = LazyLock::new(|| {
    vec![
        QueryTemplate {
            id: TemplateId::BlastRadius,
            cypher: "MATCH (n {name: $entity})-[:CALLS|DEPLOYED_IN*1..3]->(m) RETURN DISTINCT m LIMIT $max_results",
            matcher: Regex::new(r"(?i)\bblast\s+radius\s+of\s+(?P<entity>[\w.-]+)").unwrap(),
        },
        QueryTemplate {
            id: TemplateId::DependencyCount,
            cypher: "MATCH (n {name: $entity})-[:CALLS]->(m) RETURN count(DISTINCT m) AS dependency_count",
            matcher: Regex::new(r"(?i)\bhow\s+many\s+dependencies\s+(?:does|for)\s+(?P<entity>[\w.-]+)").unwrap(),
        },
        QueryTemplate {
            id: TemplateId::ServiceNeighbors,
            cypher: "MATCH (n:Service {name: $entity})-[:CALLS]-(m:Service) RETURN DISTINCT m LIMIT $max_results",
            matcher: Regex::new(r"(?i)\bneighbors?\s+of\s+(?P<entity>[\w.-]+)").unwrap(),
        },
        QueryTemplate {
            id: TemplateId::TopicConsumers,
            cypher: "MATCH (s:Service)-[:CONSUMES]->(t:KafkaTopic {name: $entity}) RETURN DISTINCT s LIMIT $max_results",
            matcher: Regex::new(r"(?i)\bconsumers?\s+of\s+(?:topic\s+)?(?P<entity>[\w.-]+)").unwrap(),
        },
        QueryTemplate {
            id: TemplateId::TopicProducers,
            cypher: "MATCH (s:Service)-[:PRODUCES]->(t:KafkaTopic {name: $entity}) RETURN DISTINCT s LIMIT $max_results",
            matcher: Regex::new(r"(?i)\bproducers?\s+of\s+(?:topic\s+)?(?P<entity>[\w.-]+)").unwrap(),
        },
        QueryTemplate {
            id: TemplateId::ServiceDeployments,
            cypher: "MATCH (s:Service {name: $entity})-[:DEPLOYED_IN]->(d:K8sDeployment) RETURN DISTINCT d LIMIT $max_results",
            matcher: Regex::new(r"(?i)\bwhere\s+is\s+(?P<entity>[\w.-]+)\s+deployed").unwrap(),
        },
        QueryTemplate {
            id: TemplateId::CrossTeamDependencies,
            cypher: "MATCH (a:Service {name: $entity})-[:CALLS]->(b:Service) WHERE a.team_owner <> b.team_owner RETURN DISTINCT b LIMIT $max_results",
            matcher: Regex::new(r"(?i)\bcross[\s-]team\s+dependencies\s+(?:of|for)\s+(?P<entity>[\w.-]+)").unwrap(),
        },
    ]
});

/// Matches free-text against the template catalog, first-match-wins in
/// catalog order. Returns the matched template id and its bound
/// parameters (always including `entity` on a match).
pub fn match_template(text: &str) -> Option<(TemplateId, HashMap<String, String>)> {
    for template in TEMPLATES.iter() {
        if let Some(caps) = template.matcher.captures(text) {
            let entity = caps.name("entity")?.as_str().to_string();
            let mut params = HashMap::new();
            params.insert("entity".to_string(), entity);
            return Some((template.id, params));
        }
    }
    None
}

/// The frozen cypher text for a template id, for execution or hashing.
pub fn template_cypher(id: TemplateId) -> &'static str {
    TEMPLATES
        .iter()
        .find(|t| t.id == id)
        .map(|t| t.cypher)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blast_radius_phrase_matches_and_extracts_entity() {
        let (id, params) = match_template("what is the blast radius of checkout-service").unwrap();
        assert_eq!(id, TemplateId::BlastRadius);
        assert_eq!(params.get("entity").unwrap(), "checkout-service");
    }

    #[test]
    fn topic_consumers_phrase_matches() {
        let (id, params) = match_template("consumers of topic orders.created").unwrap();
        assert_eq!(id, TemplateId::TopicConsumers);
        assert_eq!(params.get("entity").unwrap(), "orders.created");
    }

    #[test]
    fn unrecognized_text_matches_nothing() {
        assert!(match_template("what's the weather today").is_none());
    }

    #[test]
    fn template_hash_is_stable_across_whitespace_variation() {
        let a = "MATCH (n)   RETURN n";
        let b = "MATCH (n)\nRETURN n";
        assert_eq!(template_hash(a), template_hash(b));
    }

    #[test]
    fn every_template_is_reachable_by_id() {
        assert!(!template_cypher(TemplateId::DependencyCount).is_empty());
        assert!(!template_cypher(TemplateId::CrossTeamDependencies).is_empty());
    }
}
