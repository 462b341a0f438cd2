//! Evaluator for job-level `if:` conditions.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := comparison ( "&&" comparison )*
//! comparison := unary ( ( "==" | "!=" ) unary )?
//! unary      := "!" unary | primary
//! primary    := "(" or ")" | 'literal' | identifier [ "(" args ")" ]
//! ```
//!
//! Every value is a string. Operators yield `"true"` or `"false"` and
//! comparisons are plain string equality.

use std::collections::BTreeMap;

use crate::run::RunResult;

/// Inputs available while evaluating a condition.
#[derive(Debug, Clone, Default)]
pub struct ExprContext {
    /// Result of each dependency, keyed by job key.
    pub dep_results: BTreeMap<String, RunResult>,
    /// Flat dotted names such as `github.ref`.
    pub values: BTreeMap<String, String>,
    pub workflow_cancelled: bool,
}

impl ExprContext {
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with_dep(mut self, key: impl Into<String>, result: RunResult) -> Self {
        self.dep_results.insert(key.into(), result);
        self
    }
}

/// Evaluate a condition. An empty condition is true.
pub fn eval_expr(expr: &str, ctx: &ExprContext) -> bool {
    let body = strip_wrapper(expr);
    if body.is_empty() {
        return true;
    }
    let mut parser = Parser {
        input: body.chars().collect(),
        pos: 0,
        ctx,
    };
    is_truthy(&parser.parse_or())
}

/// Whether a condition opts into running after a failed dependency.
pub fn contains_status_function(expr: &str) -> bool {
    let lower = expr.to_ascii_lowercase();
    lower.contains("always()") || lower.contains("failure()")
}

/// A string is truthy unless it is empty, `false` or `0`.
pub fn is_truthy(value: &str) -> bool {
    !matches!(value, "" | "false" | "0")
}

fn strip_wrapper(expr: &str) -> &str {
    let trimmed = expr.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn bool_str(value: bool) -> String {
    let s = if value { "true" } else { "false" };
    s.to_string()
}

struct Parser<'a> {
    input: Vec<char>,
    pos: usize,
    ctx: &'a ExprContext,
}

impl Parser<'_> {
    fn parse_or(&mut self) -> String {
        let mut left = self.parse_and();
        loop {
            self.skip_ws();
            if !self.eat("||") {
                return left;
            }
            let right = self.parse_and();
            left = bool_str(is_truthy(&left) || is_truthy(&right));
        }
    }

    fn parse_and(&mut self) -> String {
        let mut left = self.parse_comparison();
        loop {
            self.skip_ws();
            if !self.eat("&&") {
                return left;
            }
            let right = self.parse_comparison();
            left = bool_str(is_truthy(&left) && is_truthy(&right));
        }
    }

    fn parse_comparison(&mut self) -> String {
        let left = self.parse_unary();
        self.skip_ws();
        if self.eat("==") {
            let right = self.parse_unary();
            bool_str(left == right)
        } else if self.eat("!=") {
            let right = self.parse_unary();
            bool_str(left != right)
        } else {
            left
        }
    }

    fn parse_unary(&mut self) -> String {
        self.skip_ws();
        if self.peek() == Some('!') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            let operand = self.parse_unary();
            return bool_str(!is_truthy(&operand));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> String {
        self.skip_ws();
        match self.peek() {
            None => String::new(),
            Some('(') => {
                self.pos += 1;
                let value = self.parse_or();
                self.skip_ws();
                self.eat(")");
                value
            }
            Some('\'') => self.parse_literal(),
            Some(_) => {
                let ident = self.parse_identifier();
                if ident.is_empty() {
                    // Stray operator character; consume it so parsing terminates.
                    self.pos += 1;
                    return String::new();
                }
                self.skip_ws();
                if self.peek() == Some('(') {
                    self.skip_call_args();
                    return self.call(&ident);
                }
                self.resolve(ident)
            }
        }
    }

    /// `'...'` with `''` as an escaped quote.
    fn parse_literal(&mut self) -> String {
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\'' {
                if self.peek() == Some('\'') {
                    self.pos += 1;
                    out.push('\'');
                    continue;
                }
                break;
            }
            out.push(c);
        }
        out
    }

    fn parse_identifier(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || "()!=&|'".contains(c) {
                break;
            }
            self.pos += 1;
        }
        self.input[start..self.pos].iter().collect()
    }

    fn skip_call_args(&mut self) {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '(' => depth += 1,
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    fn call(&self, name: &str) -> String {
        let deps = &self.ctx.dep_results;
        let value = match name.to_ascii_lowercase().as_str() {
            "success" => deps.values().all(RunResult::is_success_like),
            "failure" => deps.values().any(|r| *r == RunResult::Failure),
            "always" => true,
            "cancelled" => self.ctx.workflow_cancelled,
            _ => false,
        };
        bool_str(value)
    }

    fn resolve(&self, ident: String) -> String {
        match ident.as_str() {
            "true" | "false" => ident,
            _ => self.ctx.values.get(&ident).cloned().unwrap_or(ident),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        let matches = token
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c));
        if matches {
            self.pos += token.chars().count();
        }
        matches
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExprContext {
        ExprContext::default()
            .with_value("github.ref", "refs/heads/main")
            .with_value("github.event_name", "push")
    }

    #[test]
    fn empty_expression_is_true() {
        assert!(eval_expr("", &ctx()));
        assert!(eval_expr("   ", &ctx()));
        assert!(eval_expr("${{ }}", &ctx()));
    }

    #[test]
    fn comparisons_against_context_values() {
        let c = ctx();
        assert!(eval_expr("github.ref == 'refs/heads/main'", &c));
        assert!(!eval_expr("github.ref != 'refs/heads/main'", &c));
        assert!(eval_expr("${{ github.event_name == 'push' }}", &c));
        assert!(!eval_expr("github.event_name == 'pull_request'", &c));
    }

    #[test]
    fn unknown_identifiers_evaluate_to_themselves() {
        assert!(eval_expr("foo == foo", &ctx()));
        assert!(eval_expr("foo", &ctx()));
        assert!(!eval_expr("false", &ctx()));
        assert!(!eval_expr("0", &ctx()));
    }

    #[test]
    fn logical_operators_and_precedence() {
        let c = ctx();
        assert!(eval_expr("true || false && false", &c));
        assert!(!eval_expr("(true || false) && false", &c));
        assert!(eval_expr("!false", &c));
        assert!(!eval_expr("!(github.ref == 'refs/heads/main')", &c));
        assert!(eval_expr("github.event_name == 'push' && github.ref == 'refs/heads/main'", &c));
    }

    #[test]
    fn negation_and_grouping_are_consistent() {
        let c = ctx();
        for expr in ["true", "false", "github.ref == 'x'", "always()", "success() && false"] {
            assert_eq!(eval_expr(&format!("!({expr})"), &c), !eval_expr(expr, &c), "{expr}");
            assert_eq!(eval_expr(&format!("({expr})"), &c), eval_expr(expr, &c), "{expr}");
        }
    }

    #[test]
    fn status_functions() {
        let ok = ExprContext::default()
            .with_dep("a", RunResult::Success)
            .with_dep("b", RunResult::Skipped);
        assert!(eval_expr("success()", &ok));
        assert!(!eval_expr("failure()", &ok));
        assert!(eval_expr("always()", &ok));
        assert!(!eval_expr("cancelled()", &ok));

        let failed = ExprContext::default()
            .with_dep("a", RunResult::Success)
            .with_dep("b", RunResult::Failure);
        assert!(!eval_expr("success()", &failed));
        assert!(eval_expr("failure()", &failed));

        let cancelled = ExprContext {
            workflow_cancelled: true,
            ..Default::default()
        };
        assert!(eval_expr("cancelled()", &cancelled));
        assert!(eval_expr("success()", &ExprContext::default()));
        assert!(!eval_expr("hashFiles('**/Cargo.lock')", &ExprContext::default()));
    }

    #[test]
    fn literals_support_escaped_quotes() {
        let c = ExprContext::default().with_value("x", "it's");
        assert!(eval_expr("x == 'it''s'", &c));
    }

    #[test]
    fn detects_status_functions_case_insensitively() {
        assert!(contains_status_function("${{ always() }}"));
        assert!(contains_status_function("Failure() && github.ref == 'x'"));
        assert!(!contains_status_function("success()"));
        assert!(!contains_status_function("cancelled()"));
    }

    #[test]
    fn truthiness() {
        assert!(is_truthy("yes"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("0"));
    }
}
