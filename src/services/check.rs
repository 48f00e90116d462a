//! CHECK expression compilation and evaluation
//!
//! GRANT and ASSIGN statements may carry a boolean gate over the row being
//! changed and the session claims. Expressions arrive pre-parsed as
//! [`CheckExpr`] trees; compilation validates them once (precompiling
//! regexes) so evaluation on the hot path is allocation-light and
//! deterministic on the change content.

use std::cmp::Ordering;

use regex::Regex;
use thiserror::Error;

use crate::models::{Auth, CheckExpr, CheckOp, CheckOperand, Record};

/// Evaluation failure: malformed rules or an input row that does not match
/// the schema the expression was written against.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckError {
    #[error("referenced column missing: {0}")]
    MissingColumn(String),

    #[error("operands of {op:?} cannot be compared")]
    Incomparable { op: CheckOp },

    #[error("right side of {op:?} must be a list")]
    NotAList { op: CheckOp },

    #[error("{op:?} requires string operands")]
    NotAString { op: CheckOp },
}

/// What an expression is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    /// The row image under evaluation: the new record for inserts and
    /// updates, the old record for deletes
    pub record: &'a Record,
    pub auth: &'a Auth,
}

/// A compiled, reusable CHECK predicate
#[derive(Debug, Clone)]
pub struct CompiledCheck {
    expr: Compiled,
}

#[derive(Debug, Clone)]
enum Compiled {
    Cmp {
        left: CheckOperand,
        op: CheckOp,
        right: CheckOperand,
        pattern: Option<Regex>,
    },
    All(Vec<Compiled>),
    Any(Vec<Compiled>),
    Not(Box<Compiled>),
}

impl CompiledCheck {
    /// Compile an expression tree, failing on invalid regex patterns
    pub fn compile(expr: &CheckExpr) -> anyhow::Result<Self> {
        Ok(Self {
            expr: compile_node(expr)?,
        })
    }

    pub fn evaluate(&self, ctx: CheckContext<'_>) -> Result<bool, CheckError> {
        eval_node(&self.expr, ctx)
    }
}

fn compile_node(expr: &CheckExpr) -> anyhow::Result<Compiled> {
    Ok(match expr {
        CheckExpr::Cmp { left, op, right } => {
            // A literal pattern is compiled once here; non-literal
            // patterns are rejected rather than recompiled per row.
            let pattern = match op {
                CheckOp::Matches | CheckOp::NotMatches => match right {
                    CheckOperand::Literal(serde_json::Value::String(p)) => Some(Regex::new(p)?),
                    _ => anyhow::bail!("{op:?} requires a literal string pattern"),
                },
                _ => None,
            };
            Compiled::Cmp {
                left: left.clone(),
                op: *op,
                right: right.clone(),
                pattern,
            }
        }
        CheckExpr::All(branches) => {
            Compiled::All(branches.iter().map(compile_node).collect::<anyhow::Result<_>>()?)
        }
        CheckExpr::Any(branches) => {
            Compiled::Any(branches.iter().map(compile_node).collect::<anyhow::Result<_>>()?)
        }
        CheckExpr::Not(inner) => Compiled::Not(Box::new(compile_node(inner)?)),
    })
}

fn eval_node(node: &Compiled, ctx: CheckContext<'_>) -> Result<bool, CheckError> {
    match node {
        Compiled::Cmp {
            left,
            op,
            right,
            pattern,
        } => {
            let lhs = resolve(left, ctx)?;
            let rhs = resolve(right, ctx)?;
            compare(&lhs, *op, &rhs, pattern.as_ref())
        }
        Compiled::All(branches) => {
            for branch in branches {
                if !eval_node(branch, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Compiled::Any(branches) => {
            for branch in branches {
                if eval_node(branch, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Compiled::Not(inner) => Ok(!eval_node(inner, ctx)?),
    }
}

/// Resolve an operand to a value. A column must exist on the record; an
/// absent session claim resolves to null so anonymous sessions simply fail
/// equality tests instead of erroring.
fn resolve(operand: &CheckOperand, ctx: CheckContext<'_>) -> Result<serde_json::Value, CheckError> {
    match operand {
        CheckOperand::Literal(value) => Ok(value.clone()),
        CheckOperand::Auth(path) => Ok(ctx.auth.claim(path).unwrap_or(serde_json::Value::Null)),
        CheckOperand::Column(path) => {
            let mut parts = path.split('.');
            let column = parts.next().unwrap_or_default();
            let mut current = ctx
                .record
                .get(column)
                .ok_or_else(|| CheckError::MissingColumn(column.to_string()))?;
            for part in parts {
                current = current
                    .get(part)
                    .ok_or_else(|| CheckError::MissingColumn(path.to_string()))?;
            }
            Ok(current.clone())
        }
    }
}

fn compare(
    lhs: &serde_json::Value,
    op: CheckOp,
    rhs: &serde_json::Value,
    pattern: Option<&Regex>,
) -> Result<bool, CheckError> {
    match op {
        CheckOp::Eq => Ok(lhs == rhs),
        CheckOp::NotEq => Ok(lhs != rhs),
        CheckOp::Gt | CheckOp::Gte | CheckOp::Lt | CheckOp::Lte => {
            let ordering = order_values(lhs, rhs).ok_or(CheckError::Incomparable { op })?;
            Ok(match op {
                CheckOp::Gt => ordering == Ordering::Greater,
                CheckOp::Gte => ordering != Ordering::Less,
                CheckOp::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        CheckOp::In | CheckOp::NotIn => {
            let list = rhs.as_array().ok_or(CheckError::NotAList { op })?;
            let contained = list.contains(lhs);
            Ok(if op == CheckOp::In {
                contained
            } else {
                !contained
            })
        }
        CheckOp::Matches | CheckOp::NotMatches => {
            let text = lhs.as_str().ok_or(CheckError::NotAString { op })?;
            let regex = pattern.expect("pattern compiled for match operators");
            let matched = regex.is_match(text);
            Ok(if op == CheckOp::Matches {
                matched
            } else {
                !matched
            })
        }
    }
}

/// Order two JSON scalars where an ordering exists
fn order_values(a: &serde_json::Value, b: &serde_json::Value) -> Option<Ordering> {
    match (a, b) {
        (serde_json::Value::Number(an), serde_json::Value::Number(bn)) => {
            an.as_f64()?.partial_cmp(&bn.as_f64()?)
        }
        (serde_json::Value::String(astr), serde_json::Value::String(bstr)) => {
            Some(astr.cmp(bstr))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eval(expr: CheckExpr, rec: &Record, auth: &Auth) -> Result<bool, CheckError> {
        CompiledCheck::compile(&expr)
            .unwrap()
            .evaluate(CheckContext { record: rec, auth })
    }

    fn owner_check() -> CheckExpr {
        CheckExpr::Cmp {
            left: CheckOperand::Column("owner".to_string()),
            op: CheckOp::Eq,
            right: CheckOperand::Auth("user_id".to_string()),
        }
    }

    #[test]
    fn test_column_equals_auth_claim() {
        let rec = record(&[("owner", json!("alice"))]);
        assert_eq!(eval(owner_check(), &rec, &Auth::user("alice")), Ok(true));
        assert_eq!(eval(owner_check(), &rec, &Auth::user("bob")), Ok(false));
    }

    #[test]
    fn test_anonymous_claim_is_null_not_error() {
        let rec = record(&[("owner", json!("alice"))]);
        assert_eq!(eval(owner_check(), &rec, &Auth::anonymous()), Ok(false));
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let rec = record(&[]);
        assert_eq!(
            eval(owner_check(), &rec, &Auth::user("alice")),
            Err(CheckError::MissingColumn("owner".to_string()))
        );
    }

    #[test]
    fn test_numeric_ordering() {
        let expr = CheckExpr::Cmp {
            left: CheckOperand::Column("priority".to_string()),
            op: CheckOp::Gte,
            right: CheckOperand::Literal(json!(3)),
        };
        let rec = record(&[("priority", json!(5))]);
        assert_eq!(eval(expr.clone(), &rec, &Auth::anonymous()), Ok(true));
        let rec = record(&[("priority", json!(2))]);
        assert_eq!(eval(expr, &rec, &Auth::anonymous()), Ok(false));
    }

    #[test]
    fn test_in_list() {
        let expr = CheckExpr::Cmp {
            left: CheckOperand::Column("status".to_string()),
            op: CheckOp::In,
            right: CheckOperand::Literal(json!(["open", "triaged"])),
        };
        let rec = record(&[("status", json!("triaged"))]);
        assert_eq!(eval(expr, &rec, &Auth::anonymous()), Ok(true));
    }

    #[test]
    fn test_regex_matches_precompiled() {
        let expr = CheckExpr::Cmp {
            left: CheckOperand::Column("email".to_string()),
            op: CheckOp::Matches,
            right: CheckOperand::Literal(json!("@example\\.com$")),
        };
        let rec = record(&[("email", json!("alice@example.com"))]);
        assert_eq!(eval(expr, &rec, &Auth::anonymous()), Ok(true));
    }

    #[test]
    fn test_invalid_regex_fails_at_compile_time() {
        let expr = CheckExpr::Cmp {
            left: CheckOperand::Column("email".to_string()),
            op: CheckOp::Matches,
            right: CheckOperand::Literal(json!("(unclosed")),
        };
        assert!(CompiledCheck::compile(&expr).is_err());
    }

    #[test]
    fn test_conjunction_and_negation() {
        let expr = CheckExpr::All(vec![
            owner_check(),
            CheckExpr::Not(Box::new(CheckExpr::Cmp {
                left: CheckOperand::Column("archived".to_string()),
                op: CheckOp::Eq,
                right: CheckOperand::Literal(json!(true)),
            })),
        ]);
        let rec = record(&[("owner", json!("alice")), ("archived", json!(false))]);
        assert_eq!(eval(expr, &rec, &Auth::user("alice")), Ok(true));
    }

    #[test]
    fn test_json_path_into_column() {
        let expr = CheckExpr::Cmp {
            left: CheckOperand::Column("meta.visibility".to_string()),
            op: CheckOp::Eq,
            right: CheckOperand::Literal(json!("public")),
        };
        let rec = record(&[("meta", json!({"visibility": "public"}))]);
        assert_eq!(eval(expr, &rec, &Auth::anonymous()), Ok(true));
    }
}
