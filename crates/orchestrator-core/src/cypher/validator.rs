//! Read-only gate: rejects write keywords, `LOAD CSV`, disallowed
//! procedures, and cartesian products, operating on the reconstructed
//! token stream so comments and strings cannot hide or smuggle a write.

use super::tokenizer::{tokenize_cypher, TokenType};
use crate::error::{OrchestratorError, Result};
use regex::Regex;
use std::sync::LazyLock;

static WRITE_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(MERGE|CREATE|DELETE|DETACH\s+DELETE|SET|REMOVE|DROP)\b").unwrap()
});

static LOAD_CSV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bLOAD\s+CSV\b").unwrap());

static CALL_PROCEDURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCALL\s+(?-i)(?P<name>[\w.]+)").unwrap());

static DESTRUCTIVE_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bCALL\s*\{").unwrap());

pub const ALLOWED_PROCEDURES: &[&str] = &[
    "db.index.fulltext.queryNodes",
    "db.index.fulltext.queryRelationships",
    "db.labels",
    "db.relationshipTypes",
    "db.propertyKeys",
    "db.schema.visualization",
    "db.schema.nodeTypeProperties",
    "db.schema.relTypeProperties",
    "dbms.components",
    "dbms.queryJmx",
];

/// Removes comment and string-literal text from a cypher string before
/// keyword scanning, so commented-out writes and write keywords hidden
/// inside string payloads cannot smuggle past the regex gate.
fn strip_comments_and_strings(cypher: &str) -> String {
    tokenize_cypher(cypher)
        .into_iter()
        .map(|t| {
            if matches!(t.token_type, TokenType::Comment | TokenType::StringLiteral) {
                " ".repeat(t.value.chars().count())
            } else {
                t.value
            }
        })
        .collect()
}

fn has_cartesian_product(cypher: &str) -> bool {
    // A single MATCH with two or more comma-separated node patterns and
    // no relationship arrow between them, e.g. `MATCH (a), (b)`.
    static CARTESIAN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\bMATCH\s*\([^)]*\)\s*,\s*\([^)]*\)").unwrap());
    static HAS_REL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-<]{1,2}[\[\-]").unwrap());
    for m in CARTESIAN.find_iter(cypher) {
        if !HAS_REL.is_match(m.as_str()) {
            return true;
        }
    }
    false
}

/// Validates a query is read-only and within the procedure allowlist.
/// Returns the stripped, evaluated query text on success.
pub fn validate_cypher_readonly(cypher: &str) -> Result<()> {
    let scan_target = strip_comments_and_strings(cypher);

    if WRITE_KEYWORDS.is_match(&scan_target) {
        return Err(OrchestratorError::CypherValidation(
            "query contains a write operation".to_string(),
        ));
    }
    if DESTRUCTIVE_CALL.is_match(&scan_target) {
        return Err(OrchestratorError::CypherValidation(
            "query contains a CALL subquery".to_string(),
        ));
    }
    if LOAD_CSV.is_match(&scan_target) {
        return Err(OrchestratorError::CypherValidation(
            "query contains LOAD CSV".to_string(),
        ));
    }
    for caps in CALL_PROCEDURE.captures_iter(&scan_target) {
        let name = &caps["name"];
        if !ALLOWED_PROCEDURES.contains(&name) {
            return Err(OrchestratorError::CypherValidation(format!(
                "query calls disallowed procedure '{name}'"
            )));
        }
    }
    if has_cartesian_product(&scan_target) {
        return Err(OrchestratorError::CypherValidation(
            "query contains a cartesian product".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_write_keyword() {
        let err = validate_cypher_readonly("MATCH (n) SET n.x = 1 RETURN n").unwrap_err();
        assert!(matches!(err, OrchestratorError::CypherValidation(_)));
    }

    #[test]
    fn commented_out_write_is_still_rejected_via_plain_scan() {
        // The write keyword itself is outside a string/comment here;
        // only comment/string *contents* are exempted from scanning.
        assert!(validate_cypher_readonly("MATCH (n) DELETE n").is_err());
    }

    #[test]
    fn write_keyword_inside_string_is_not_rejected() {
        assert!(validate_cypher_readonly(
            "MATCH (n) WHERE n.desc = \"please DELETE this later\" RETURN n"
        )
        .is_ok());
    }

    #[test]
    fn write_keyword_inside_comment_is_not_rejected() {
        assert!(validate_cypher_readonly("MATCH (n) // DELETE n\nRETURN n").is_ok());
    }

    #[test]
    fn rejects_load_csv() {
        assert!(validate_cypher_readonly("LOAD CSV FROM 'file:///x.csv' AS row RETURN row").is_err());
    }

    #[test]
    fn rejects_disallowed_procedure() {
        assert!(validate_cypher_readonly("CALL apoc.periodic.iterate() YIELD x RETURN x").is_err());
    }

    #[test]
    fn allows_whitelisted_procedure() {
        assert!(validate_cypher_readonly(
            "CALL db.index.fulltext.queryNodes('svc', 'auth') YIELD node RETURN node"
        )
        .is_ok());
    }

    #[test]
    fn rejects_cartesian_product() {
        assert!(validate_cypher_readonly("MATCH (a:Service), (b:Service) RETURN a, b").is_err());
    }

    #[test]
    fn connected_pattern_is_not_a_cartesian_product() {
        assert!(validate_cypher_readonly("MATCH (a:Service)-[:CALLS]->(b:Service) RETURN a, b").is_ok());
    }

    #[test]
    fn rejects_brace_subquery() {
        assert!(validate_cypher_readonly("MATCH (n) CALL { MATCH (m) RETURN m } RETURN n").is_err());
    }
}
