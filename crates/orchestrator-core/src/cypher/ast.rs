//! Tokens → clause tree, and back. A closed set of tagged variants with
//! exhaustive matching in the rewriter and the coverage verifier, per
//! the redesign guidance against dynamically typed clause lists.

use super::tokenizer::{tokenize_cypher, CypherToken, TokenType};
use std::sync::LazyLock;

/// One parsed clause. Each clause owns its token slice; reconstruction
/// of a clause list is concatenation, so the round-trip law holds
/// modulo whitespace the rewriter itself introduces.
#[derive(Debug, Clone)]
pub enum Clause {
    Match { tokens: Vec<CypherToken> },
    Where { tokens: Vec<CypherToken> },
    Return { tokens: Vec<CypherToken> },
    With { tokens: Vec<CypherToken> },
    CallSubquery {
        tokens: Vec<CypherToken>,
        body: Vec<Clause>,
    },
    UnionQuery {
        tokens: Vec<CypherToken>,
        branches: Vec<Vec<Clause>>,
    },
    Unwind {
        tokens: Vec<CypherToken>,
        expression_text: Option<String>,
    },
    Generic { tokens: Vec<CypherToken> },
}

impl Clause {
    fn tokens(&self) -> &[CypherToken] {
        match self {
            Clause::Match { tokens }
            | Clause::Where { tokens }
            | Clause::Return { tokens }
            | Clause::With { tokens }
            | Clause::CallSubquery { tokens, .. }
            | Clause::UnionQuery { tokens, .. }
            | Clause::Unwind { tokens, .. }
            | Clause::Generic { tokens } => tokens,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CypherAst {
    pub clauses: Vec<Clause>,
}

static CLAUSE_KEYWORDS: LazyLock<std::collections::HashSet<&'static str>> = LazyLock::new(|| {
    [
        "MATCH", "WHERE", "RETURN", "WITH", "CALL", "UNION", "OPTIONAL", "UNWIND", "ORDER",
        "SKIP", "LIMIT",
    ]
    .into_iter()
    .collect()
});

fn tokens_text(tokens: &[CypherToken]) -> String {
    tokens.iter().map(|t| t.value.as_str()).collect()
}

pub struct Parser {
    tokens: Vec<CypherToken>,
    pos: usize,
}

impl Parser {
    pub fn new(cypher: &str) -> Self {
        Self {
            tokens: tokenize_cypher(cypher),
            pos: 0,
        }
    }

    pub fn parse(mut self) -> CypherAst {
        let clauses = self.parse_clauses(true);
        CypherAst { clauses }
    }

    fn current(&self) -> Option<&CypherToken> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> CypherToken {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn skip_whitespace(&mut self) -> Vec<CypherToken> {
        let mut ws = Vec::new();
        while let Some(tok) = self.tokens.get(self.pos) {
            if tok.token_type == TokenType::Whitespace {
                ws.push(self.advance());
            } else {
                break;
            }
        }
        ws
    }

    fn parse_clauses(&mut self, top_level: bool) -> Vec<Clause> {
        let mut clauses = Vec::new();
        while let Some(tok) = self.current() {
            if tok.token_type == TokenType::Whitespace {
                self.advance();
                continue;
            }
            if tok.token_type == TokenType::Punctuation && tok.value == "}" && !top_level {
                break;
            }
            if tok.token_type == TokenType::Keyword {
                let upper = tok.value.to_ascii_uppercase();
                let clause = self.dispatch_keyword(&upper, &clauses);
                clauses.push(clause);
            } else {
                clauses.push(self.parse_generic());
            }
        }
        clauses
    }

    fn dispatch_keyword(&mut self, upper: &str, preceding: &[Clause]) -> Clause {
        match upper {
            "MATCH" | "OPTIONAL" => self.parse_simple(Clause::Match { tokens: vec![] }),
            "WHERE" => self.parse_simple(Clause::Where { tokens: vec![] }),
            "RETURN" => self.parse_simple(Clause::Return { tokens: vec![] }),
            "WITH" => self.parse_simple(Clause::With { tokens: vec![] }),
            "CALL" => self.parse_call(),
            "UNWIND" => self.parse_unwind(),
            "UNION" => self.parse_union(preceding),
            _ => self.parse_generic(),
        }
    }

    fn collect_until_clause_keyword(&mut self, scope_depth: u32) -> Vec<CypherToken> {
        let mut collected = Vec::new();
        while let Some(tok) = self.tokens.get(self.pos) {
            if tok.token_type == TokenType::Keyword
                && CLAUSE_KEYWORDS.contains(tok.value.to_ascii_uppercase().as_str())
                && tok.brace_depth == scope_depth
            {
                break;
            }
            if tok.token_type == TokenType::Punctuation
                && tok.value == "}"
                && tok.brace_depth <= scope_depth
            {
                break;
            }
            collected.push(self.advance());
        }
        collected
    }

    /// Shared shape for Match/Where/Return/With: keyword token plus the
    /// scope-guarded tail, wrapped in the variant `template` supplies.
    fn parse_simple(&mut self, template: Clause) -> Clause {
        let kw = self.advance();
        let depth = kw.brace_depth;
        let mut tokens = vec![kw];
        tokens.extend(self.collect_until_clause_keyword(depth));
        match template {
            Clause::Match { .. } => Clause::Match { tokens },
            Clause::Where { .. } => Clause::Where { tokens },
            Clause::Return { .. } => Clause::Return { tokens },
            Clause::With { .. } => Clause::With { tokens },
            other => other,
        }
    }

    fn parse_unwind(&mut self) -> Clause {
        let kw = self.advance();
        let depth = kw.brace_depth;
        let body_tokens = self.collect_until_clause_keyword(depth);
        let mut tokens = vec![kw];
        tokens.extend(body_tokens.clone());
        let mut expr_parts = Vec::new();
        for t in &body_tokens {
            if t.token_type == TokenType::Keyword && t.value.eq_ignore_ascii_case("AS") {
                break;
            }
            expr_parts.push(t.value.as_str());
        }
        let expr = expr_parts.concat().trim().to_string();
        Clause::Unwind {
            tokens,
            expression_text: if expr.is_empty() { None } else { Some(expr) },
        }
    }

    fn parse_call(&mut self) -> Clause {
        let call_token = self.advance();
        let ws = self.skip_whitespace();
        if let Some(tok) = self.current() {
            if tok.token_type == TokenType::Punctuation && tok.value == "{" {
                self.advance();
                let body = self.parse_clauses(false);
                if let Some(tok) = self.tokens.get(self.pos) {
                    if tok.value == "}" {
                        self.advance();
                    }
                }
                let mut tokens = vec![call_token];
                tokens.extend(ws);
                return Clause::CallSubquery { tokens, body };
            }
        }
        let mut tokens = vec![call_token];
        tokens.extend(ws);
        tokens.extend(self.collect_until_clause_keyword(0));
        Clause::CallSubquery {
            tokens,
            body: vec![],
        }
    }

    fn parse_union(&mut self, preceding: &[Clause]) -> Clause {
        let union_token = self.advance();
        let mut ws = self.skip_whitespace();
        let mut all_token = Vec::new();
        if let Some(tok) = self.current() {
            if tok.token_type == TokenType::Keyword && tok.value.eq_ignore_ascii_case("ALL") {
                all_token.push(self.advance());
                ws.extend(self.skip_whitespace());
            }
        }
        let rest = self.parse_clauses(true);
        let mut tokens = vec![union_token];
        tokens.extend(all_token);
        tokens.extend(ws);
        Clause::UnionQuery {
            tokens,
            branches: vec![preceding.to_vec(), rest],
        }
    }

    fn parse_generic(&mut self) -> Clause {
        let kw = self.advance();
        let depth = kw.brace_depth;
        let mut tokens = vec![kw];
        tokens.extend(self.collect_until_clause_keyword(depth));
        Clause::Generic { tokens }
    }
}

pub fn parse(cypher: &str) -> CypherAst {
    Parser::new(cypher).parse()
}

pub fn reconstruct(ast: &CypherAst) -> String {
    reconstruct_clauses(&ast.clauses)
}

fn reconstruct_clauses(clauses: &[Clause]) -> String {
    let mut parts = String::new();
    for clause in clauses {
        match clause {
            Clause::CallSubquery { tokens, body } if !body.is_empty() => {
                parts.push_str(&tokens_text(tokens));
                parts.push_str("{ ");
                parts.push_str(&reconstruct_clauses(body));
                parts.push_str(" }");
            }
            Clause::UnionQuery { tokens, branches } => {
                parts.push_str(&tokens_text(tokens));
                if branches.len() > 1 {
                    parts.push_str(&reconstruct_clauses(&branches[1]));
                }
            }
            other => parts.push_str(&tokens_text(other.tokens())),
        }
    }
    parts
}

fn strip_where_keyword(text: &str) -> String {
    let stripped = text.trim_start();
    if stripped.len() >= 5 && stripped[..5].eq_ignore_ascii_case("WHERE") {
        stripped[5..].to_string()
    } else {
        text.to_string()
    }
}

/// Inject `acl_condition` as a WHERE clause immediately following every
/// MATCH in every scope (top level, CALL subquery bodies, UNION
/// branches). Existing WHERE predicates are ANDed, preserving
/// parentheses around the original body. If no MATCH exists but a bare
/// procedure call is present, injects before RETURN instead.
pub fn inject_acl_all_scopes(cypher: &str, acl_condition: &str) -> String {
    let mut ast = parse(cypher);
    inject_into_clauses(&mut ast.clauses, acl_condition);
    reconstruct(&ast)
}

fn inject_into_clauses(clauses: &mut Vec<Clause>, acl_condition: &str) {
    let mut injected = false;
    let mut i = 0;
    while i < clauses.len() {
        match &mut clauses[i] {
            Clause::CallSubquery { body, .. } if !body.is_empty() => {
                inject_into_clauses(body, acl_condition);
            }
            Clause::UnionQuery { branches, .. } => {
                for branch in branches.iter_mut() {
                    inject_into_clauses(branch, acl_condition);
                }
            }
            _ => {}
        }

        if matches!(clauses[i], Clause::Match { .. }) {
            injected = true;
            let next_idx = i + 1;
            if let Some(Clause::Where { tokens }) = clauses.get(next_idx) {
                let where_text = tokens_text(tokens);
                let body = strip_where_keyword(&where_text);
                let new_text =
                    format!(" WHERE {acl_condition} AND ({}) ", body.trim());
                clauses[next_idx] = Clause::Where {
                    tokens: tokenize_cypher(&new_text),
                };
            } else {
                let where_tokens = tokenize_cypher(&format!(" WHERE {acl_condition} "));
                clauses.insert(
                    next_idx,
                    Clause::Where {
                        tokens: where_tokens,
                    },
                );
            }
        }
        i += 1;
    }

    if !injected {
        let has_procedure_call = clauses
            .iter()
            .any(|c| matches!(c, Clause::CallSubquery { body, .. } if body.is_empty()));
        if has_procedure_call {
            inject_before_return(clauses, acl_condition);
        }
    }
}

fn inject_before_return(clauses: &mut Vec<Clause>, acl_condition: &str) {
    if let Some(i) = clauses.iter().position(|c| matches!(c, Clause::Return { .. })) {
        let where_tokens = tokenize_cypher(&format!(" WHERE {acl_condition} "));
        clauses.insert(
            i,
            Clause::Where {
                tokens: where_tokens,
            },
        );
    }
}

/// Witness for the ACL coverage invariant: every MATCH clause's own
/// text, or its immediately following WHERE clause's text, must
/// contain `marker` (the property name left of `=` in the injected
/// condition), recursively through every CALL body and UNION branch.
pub fn validate_acl_coverage(cypher: &str, marker: &str) -> bool {
    let ast = parse(cypher);
    all_matches_have_acl(&ast.clauses, marker)
}

fn all_matches_have_acl(clauses: &[Clause], marker: &str) -> bool {
    let mut i = 0;
    while i < clauses.len() {
        match &clauses[i] {
            Clause::CallSubquery { body, .. } if !body.is_empty() => {
                if !all_matches_have_acl(body, marker) {
                    return false;
                }
            }
            Clause::UnionQuery { branches, .. } => {
                for branch in branches {
                    if !all_matches_have_acl(branch, marker) {
                        return false;
                    }
                }
            }
            _ => {}
        }

        if let Clause::Match { tokens } = &clauses[i] {
            let match_text = tokens_text(tokens);
            if match_text.contains(marker) {
                i += 1;
                continue;
            }
            let next_idx = i + 1;
            match clauses.get(next_idx) {
                Some(Clause::Where { tokens }) => {
                    if !tokens_text(tokens).contains(marker) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        i += 1;
    }
    true
}

fn is_limit_clause(clause: &Clause) -> bool {
    let tokens = clause.tokens();
    for t in tokens {
        if t.token_type == TokenType::Whitespace {
            continue;
        }
        return t.token_type == TokenType::Keyword && t.value.eq_ignore_ascii_case("LIMIT");
    }
    false
}

fn extract_limit_value(clause: &Clause) -> Option<i64> {
    if !is_limit_clause(clause) {
        return None;
    }
    for t in clause.tokens() {
        if t.token_type == TokenType::Number {
            return t.value.parse::<i64>().ok();
        }
    }
    None
}

fn set_limit_value(clause: &mut Clause, value: i64) {
    let tokens = match clause {
        Clause::Match { tokens }
        | Clause::Where { tokens }
        | Clause::Return { tokens }
        | Clause::With { tokens }
        | Clause::CallSubquery { tokens, .. }
        | Clause::UnionQuery { tokens, .. }
        | Clause::Unwind { tokens, .. }
        | Clause::Generic { tokens } => tokens,
    };
    for t in tokens.iter_mut() {
        if t.token_type == TokenType::Number {
            t.value = value.to_string();
            return;
        }
    }
}

/// Caps every LIMIT in the AST at `max_results`, recursing into CALL
/// bodies and UNION branches. Operates purely on the AST, so a string
/// literal like `"LIMIT 9999"` is never touched.
fn cap_limits_in_clauses(clauses: &mut [Clause], max_results: i64) -> bool {
    let mut found_limit = false;
    for clause in clauses.iter_mut() {
        match clause {
            Clause::CallSubquery { body, .. } if !body.is_empty() => {
                cap_limits_in_clauses(body, max_results);
            }
            Clause::UnionQuery { branches, .. } => {
                for branch in branches.iter_mut() {
                    cap_limits_in_clauses(branch, max_results);
                }
            }
            _ => {}
        }
        if let Some(current) = extract_limit_value(clause) {
            found_limit = true;
            if current > max_results {
                set_limit_value(clause, max_results);
            }
        }
    }
    found_limit
}

/// Caps every LIMIT at `max_results`; appends `LIMIT max_results` if no
/// LIMIT is present at all.
pub fn inject_limit_ast(cypher: &str, max_results: i64) -> String {
    let mut ast = parse(cypher);
    let found = cap_limits_in_clauses(&mut ast.clauses, max_results);
    if !found {
        let tokens = tokenize_cypher(&format!(" LIMIT {max_results}"));
        ast.clauses.push(Clause::Generic { tokens });
    }
    reconstruct(&ast)
}

fn clause_has_unwind_keyword(tokens: &[CypherToken]) -> bool {
    tokens
        .iter()
        .any(|t| t.token_type == TokenType::Keyword && t.value.eq_ignore_ascii_case("UNWIND"))
}

fn has_unwind_in_clauses(clauses: &[Clause]) -> bool {
    for clause in clauses {
        match clause {
            Clause::Unwind { .. } => return true,
            Clause::Generic { tokens } => {
                if clause_has_unwind_keyword(tokens) {
                    return true;
                }
            }
            Clause::CallSubquery { body, .. } if !body.is_empty() => {
                if has_unwind_in_clauses(body) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Detects `WITH … LIMIT k` followed by `UNWIND` or a CALL subquery
/// containing UNWIND — a row-explosion pattern.
fn has_amplification_in_clauses(clauses: &[Clause]) -> bool {
    let mut seen_with = false;
    let mut seen_limit_after_with = false;

    for clause in clauses {
        if matches!(clause, Clause::With { .. }) {
            seen_with = true;
            continue;
        }

        if seen_with && is_limit_clause(clause) {
            seen_limit_after_with = true;
            continue;
        }

        match clause {
            Clause::CallSubquery { body, .. } if !body.is_empty() => {
                if seen_limit_after_with && has_unwind_in_clauses(body) {
                    return true;
                }
                if has_amplification_in_clauses(body) {
                    return true;
                }
            }
            Clause::Unwind { .. } if seen_limit_after_with => return true,
            Clause::Generic { tokens } => {
                if seen_limit_after_with && clause_has_unwind_keyword(tokens) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

pub fn has_amplification(cypher: &str) -> bool {
    let ast = parse(cypher);
    has_amplification_in_clauses(&ast.clauses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_exact_for_simple_query() {
        let q = "MATCH (n:Service) WHERE n.name = \"auth\" RETURN n";
        let ast = parse(q);
        assert_eq!(reconstruct(&ast), q);
    }

    #[test]
    fn round_trip_handles_call_subquery() {
        let q = "MATCH (n) CALL { MATCH (m) RETURN m } RETURN n";
        let ast = parse(q);
        assert_eq!(reconstruct(&ast), q);
    }

    #[test]
    fn round_trip_handles_union() {
        let q = "MATCH (n) RETURN n UNION MATCH (k) RETURN k";
        let ast = parse(q);
        assert_eq!(reconstruct(&ast), q);
    }

    #[test]
    fn acl_coverage_across_union_and_nested_subquery() {
        let q = "MATCH (n:Service) CALL { CALL { MATCH (m) RETURN m } RETURN m } RETURN n UNION MATCH (k:Service) RETURN k";
        let rewritten = inject_acl_all_scopes(q, "n.team_owner = $acl_team");
        assert!(validate_acl_coverage(&rewritten, "team_owner"));
    }

    #[test]
    fn acl_coverage_ands_with_existing_where() {
        let q = "MATCH (n) WHERE n.active = true RETURN n";
        let rewritten = inject_acl_all_scopes(q, "n.team_owner = $acl_team");
        assert!(rewritten.contains("n.active = true"));
        assert!(validate_acl_coverage(&rewritten, "team_owner"));
    }

    #[test]
    fn string_literal_limit_is_untouched_by_ast_capper() {
        let q = r#"MATCH (n:Service) WHERE n.desc = "LIMIT 9999" RETURN n"#;
        let capped = inject_limit_ast(q, 100);
        assert!(capped.contains("\"LIMIT 9999\""));
        let limit_keyword_count = tokenize_cypher(&capped)
            .iter()
            .filter(|t| t.token_type == TokenType::Keyword && t.value.eq_ignore_ascii_case("LIMIT"))
            .count();
        assert_eq!(limit_keyword_count, 1);
    }

    #[test]
    fn limit_is_capped_not_raised() {
        let q = "MATCH (n) RETURN n LIMIT 5";
        let capped = inject_limit_ast(q, 100);
        assert!(capped.contains("LIMIT 5"));
    }

    #[test]
    fn limit_over_cap_is_reduced() {
        let q = "MATCH (n) RETURN n LIMIT 99999";
        let capped = inject_limit_ast(q, 100);
        assert!(capped.contains("LIMIT 100"));
        assert!(!capped.contains("99999"));
    }

    #[test]
    fn missing_limit_is_appended() {
        let q = "MATCH (n) RETURN n";
        let capped = inject_limit_ast(q, 100);
        assert!(capped.contains("LIMIT 100"));
    }

    #[test]
    fn amplification_pattern_is_detected() {
        let q = "MATCH (n) WITH n LIMIT 10 UNWIND range(1,1000000) AS x RETURN n, x";
        assert!(has_amplification(q));
    }

    #[test]
    fn ordinary_with_limit_is_not_amplification() {
        let q = "MATCH (n) WITH n LIMIT 10 RETURN n";
        assert!(!has_amplification(q));
    }
}
