//! Parser for the expression language.
//!
//! Turns source text into an [`Expression`] tree using the pest grammar in
//! `grammar.pest`.

use super::ast::{Expression, Operator, UnaryOperator, Value};
use super::ExpressionError;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "expression/grammar.pest"]
struct ExpressionGrammar;

/// Parser for virtual field expressions.
pub struct ExpressionParser;

impl ExpressionParser {
    /// Parses a complete expression. Trailing input is an error.
    pub fn parse(source: &str) -> Result<Expression, ExpressionError> {
        let mut pairs = ExpressionGrammar::parse(Rule::complete_expr, source)
            .map_err(|e| ExpressionError::Parse(e.to_string()))?;

        let complete = pairs
            .next()
            .ok_or_else(|| ExpressionError::Parse("empty expression".to_string()))?;
        let expr = complete
            .into_inner()
            .next()
            .ok_or_else(|| ExpressionError::Parse("empty expression".to_string()))?;

        build(expr)
    }
}

fn build(pair: Pair<'_, Rule>) -> Result<Expression, ExpressionError> {
    match pair.as_rule() {
        Rule::expr | Rule::atom => {
            let inner = first_inner(pair)?;
            build(inner)
        }
        Rule::ternary_expr => build_ternary(pair),
        Rule::or_expr | Rule::and_expr | Rule::comp_expr | Rule::add_expr | Rule::mul_expr => {
            build_left_assoc(pair)
        }
        Rule::pow_expr => build_power(pair),
        Rule::unary_expr => build_unary(pair),
        Rule::number => {
            let n = pair
                .as_str()
                .parse::<f64>()
                .map_err(|e| ExpressionError::Parse(format!("invalid number '{}': {}", pair.as_str(), e)))?;
            Ok(Expression::Literal(Value::Number(n)))
        }
        Rule::string => {
            let raw = pair
                .into_inner()
                .next()
                .map(|inner| inner.as_str())
                .unwrap_or_default();
            Ok(Expression::Literal(Value::String(unescape(raw))))
        }
        Rule::boolean => Ok(Expression::Literal(Value::Boolean(pair.as_str() == "true"))),
        Rule::null => Ok(Expression::Literal(Value::Null)),
        Rule::identifier => Ok(Expression::Variable(pair.as_str().to_string())),
        Rule::field_access => {
            let mut parts = pair.into_inner();
            let head = parts
                .next()
                .ok_or_else(|| ExpressionError::Parse("field access without object".to_string()))?;
            let mut expr = Expression::Variable(head.as_str().to_string());
            for field in parts {
                expr = Expression::FieldAccess {
                    object: Box::new(expr),
                    field: field.as_str().to_string(),
                };
            }
            Ok(expr)
        }
        Rule::function_call => {
            let mut parts = pair.into_inner();
            let name = parts
                .next()
                .ok_or_else(|| ExpressionError::Parse("function call without name".to_string()))?
                .as_str()
                .to_string();
            let args = parts.map(build).collect::<Result<Vec<_>, _>>()?;
            Ok(Expression::FunctionCall { name, args })
        }
        rule => Err(ExpressionError::Parse(format!("unexpected rule: {:?}", rule))),
    }
}

fn first_inner(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>, ExpressionError> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| ExpressionError::Parse(format!("empty {:?}", rule)))
}

fn build_ternary(pair: Pair<'_, Rule>) -> Result<Expression, ExpressionError> {
    let mut inner = pair.into_inner();
    let condition = build(
        inner
            .next()
            .ok_or_else(|| ExpressionError::Parse("missing condition".to_string()))?,
    )?;

    let Some(then_pair) = inner.next() else {
        return Ok(condition);
    };
    let else_pair = inner
        .next()
        .ok_or_else(|| ExpressionError::Parse("conditional without else branch".to_string()))?;

    Ok(Expression::Conditional {
        condition: Box::new(condition),
        then_branch: Box::new(build(then_pair)?),
        else_branch: Box::new(build(else_pair)?),
    })
}

fn build_left_assoc(pair: Pair<'_, Rule>) -> Result<Expression, ExpressionError> {
    let mut inner = pair.into_inner();
    let mut left = build(
        inner
            .next()
            .ok_or_else(|| ExpressionError::Parse("missing left operand".to_string()))?,
    )?;

    while let Some(op) = inner.next() {
        let operator = parse_operator(op.as_str())?;
        let right = build(
            inner
                .next()
                .ok_or_else(|| ExpressionError::Parse(format!("missing operand after '{}'", op.as_str())))?,
        )?;
        left = Expression::BinaryOp {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        };
    }

    Ok(left)
}

/// `^` binds right to left: `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`.
fn build_power(pair: Pair<'_, Rule>) -> Result<Expression, ExpressionError> {
    let operands = pair
        .into_inner()
        .filter(|p| p.as_rule() != Rule::pow_op)
        .map(build)
        .collect::<Result<Vec<_>, _>>()?;

    let mut iter = operands.into_iter().rev();
    let mut acc = iter
        .next()
        .ok_or_else(|| ExpressionError::Parse("missing power operand".to_string()))?;
    for base in iter {
        acc = Expression::BinaryOp {
            left: Box::new(base),
            operator: Operator::Power,
            right: Box::new(acc),
        };
    }
    Ok(acc)
}

fn build_unary(pair: Pair<'_, Rule>) -> Result<Expression, ExpressionError> {
    let mut ops = Vec::new();
    let mut operand = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::unary_op => ops.push(if inner.as_str() == "-" {
                UnaryOperator::Negate
            } else {
                UnaryOperator::Not
            }),
            _ => operand = Some(build(inner)?),
        }
    }

    let mut expr =
        operand.ok_or_else(|| ExpressionError::Parse("unary operator without operand".to_string()))?;
    for operator in ops.into_iter().rev() {
        expr = Expression::UnaryOp {
            operator,
            expr: Box::new(expr),
        };
    }
    Ok(expr)
}

fn parse_operator(symbol: &str) -> Result<Operator, ExpressionError> {
    let op = match symbol {
        "+" => Operator::Add,
        "-" => Operator::Subtract,
        "*" => Operator::Multiply,
        "/" => Operator::Divide,
        "%" => Operator::Modulo,
        "^" => Operator::Power,
        "==" => Operator::Equal,
        "!=" => Operator::NotEqual,
        "<" => Operator::LessThan,
        "<=" => Operator::LessThanOrEqual,
        ">" => Operator::GreaterThan,
        ">=" => Operator::GreaterThanOrEqual,
        "&&" => Operator::And,
        "||" => Operator::Or,
        other => return Err(ExpressionError::Parse(format!("unknown operator '{}'", other))),
    };
    Ok(op)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expression> {
        Box::new(Expression::Variable(name.to_string()))
    }

    fn num(n: f64) -> Box<Expression> {
        Box::new(Expression::Literal(Value::Number(n)))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = ExpressionParser::parse("a + b * 2").unwrap();
        assert_eq!(
            expr,
            Expression::BinaryOp {
                left: var("a"),
                operator: Operator::Add,
                right: Box::new(Expression::BinaryOp {
                    left: var("b"),
                    operator: Operator::Multiply,
                    right: num(2.0),
                }),
            }
        );
    }

    #[test]
    fn power_is_right_associative() {
        let expr = ExpressionParser::parse("2 ^ 3 ^ 2").unwrap();
        assert_eq!(
            expr,
            Expression::BinaryOp {
                left: num(2.0),
                operator: Operator::Power,
                right: Box::new(Expression::BinaryOp {
                    left: num(3.0),
                    operator: Operator::Power,
                    right: num(2.0),
                }),
            }
        );
    }

    #[test]
    fn parses_conditional_with_comparison() {
        let expr = ExpressionParser::parse("done == true ? \"closed\" : \"open\"").unwrap();
        match expr {
            Expression::Conditional { condition, .. } => assert_eq!(
                *condition,
                Expression::BinaryOp {
                    left: var("done"),
                    operator: Operator::Equal,
                    right: Box::new(Expression::Literal(Value::Boolean(true))),
                }
            ),
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn parses_function_calls_and_field_access() {
        let expr = ExpressionParser::parse("upper(owner.name)").unwrap();
        assert_eq!(
            expr,
            Expression::FunctionCall {
                name: "upper".to_string(),
                args: vec![Expression::FieldAccess {
                    object: var("owner"),
                    field: "name".to_string(),
                }],
            }
        );
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert_eq!(
            ExpressionParser::parse("null").unwrap(),
            Expression::Literal(Value::Null)
        );
        assert_eq!(
            ExpressionParser::parse("nullable").unwrap(),
            Expression::Variable("nullable".to_string())
        );
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_eq!(
            ExpressionParser::parse(r#""a\"b\n""#).unwrap(),
            Expression::Literal(Value::String("a\"b\n".to_string()))
        );
    }

    #[test]
    fn rejects_trailing_input() {
        assert!(matches!(
            ExpressionParser::parse("a b"),
            Err(ExpressionError::Parse(_))
        ));
        assert!(ExpressionParser::parse("").is_err());
        assert!(ExpressionParser::parse("a ? b").is_err());
    }
}
