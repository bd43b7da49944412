//! Interpreter for the expression language.
//!
//! Evaluates an AST against a set of named bindings. Evaluation is pure: the
//! only inputs are the bindings and the allow-listed builtins, so there is no
//! way for an expression to reach the host environment.

use super::ast::{Expression, Operator, UnaryOperator, Value};
use super::ExpressionError;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

pub mod builtins;
pub use builtins::{builtin, BuiltinFunction, BUILTIN_NAMES};

/// Interpreter for virtual field expressions.
#[derive(Default)]
pub struct Interpreter {
    /// Variables in the current scope
    variables: HashMap<String, Value>,
}

impl Interpreter {
    /// Creates a new interpreter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new interpreter with the given variables.
    pub fn with_variables(variables: HashMap<String, Value>) -> Self {
        Self { variables }
    }

    /// Evaluates an expression.
    pub fn evaluate(&self, expr: &Expression) -> Result<Value, ExpressionError> {
        match expr {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Variable(name) => self.evaluate_variable(name),
            Expression::FieldAccess { object, field } => self.evaluate_field_access(object, field),
            Expression::BinaryOp {
                left,
                operator,
                right,
            } => self.evaluate_binary_op(left, operator, right),
            Expression::UnaryOp { operator, expr } => self.evaluate_unary_op(operator, expr),
            Expression::FunctionCall { name, args } => self.evaluate_function_call(name, args),
            Expression::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if truthy(&self.evaluate(condition)?, "condition")? {
                    self.evaluate(then_branch)
                } else {
                    self.evaluate(else_branch)
                }
            }
        }
    }

    fn evaluate_variable(&self, name: &str) -> Result<Value, ExpressionError> {
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| eval_err(format!("Variable not found: {}", name)))
    }

    /// Missing fields and fields of null read as null.
    fn evaluate_field_access(&self, object: &Expression, field: &str) -> Result<Value, ExpressionError> {
        match self.evaluate(object)? {
            Value::Object(map) => Ok(map.get(field).cloned().map(Value::from).unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(eval_err(format!(
                "Cannot access field {} on {} value",
                field,
                other.type_name()
            ))),
        }
    }

    fn evaluate_function_call(&self, name: &str, args: &[Expression]) -> Result<Value, ExpressionError> {
        let func = builtin(name).ok_or_else(|| eval_err(format!("Function not found: {}", name)))?;
        let evaluated = args
            .iter()
            .map(|arg| self.evaluate(arg))
            .collect::<Result<Vec<_>, _>>()?;
        func(evaluated).map_err(|message| eval_err(format!("{}: {}", name, message)))
    }

    fn evaluate_binary_op(
        &self,
        left: &Expression,
        operator: &Operator,
        right: &Expression,
    ) -> Result<Value, ExpressionError> {
        // Logical operators short-circuit before touching the right side.
        match operator {
            Operator::And => {
                if !truthy(&self.evaluate(left)?, "&&")? {
                    return Ok(Value::Boolean(false));
                }
                return Ok(Value::Boolean(truthy(&self.evaluate(right)?, "&&")?));
            }
            Operator::Or => {
                if truthy(&self.evaluate(left)?, "||")? {
                    return Ok(Value::Boolean(true));
                }
                return Ok(Value::Boolean(truthy(&self.evaluate(right)?, "||")?));
            }
            _ => {}
        }

        let left_val = self.evaluate(left)?;
        let right_val = self.evaluate(right)?;

        match operator {
            Operator::Add => add(&left_val, &right_val),
            Operator::Subtract => arithmetic(&left_val, &right_val, "subtract", |a, b| Ok(a - b)),
            Operator::Multiply => arithmetic(&left_val, &right_val, "multiply", |a, b| Ok(a * b)),
            Operator::Divide => arithmetic(&left_val, &right_val, "divide", |a, b| {
                if b == 0.0 {
                    Err(eval_err("Division by zero"))
                } else {
                    Ok(a / b)
                }
            }),
            Operator::Modulo => arithmetic(&left_val, &right_val, "take remainder of", |a, b| {
                if b == 0.0 {
                    Err(eval_err("Modulo by zero"))
                } else {
                    Ok(a % b)
                }
            }),
            Operator::Power => arithmetic(&left_val, &right_val, "raise", |a, b| Ok(a.powf(b))),
            Operator::Equal => Ok(Value::Boolean(equal(&left_val, &right_val))),
            Operator::NotEqual => Ok(Value::Boolean(!equal(&left_val, &right_val))),
            Operator::LessThan => compare(&left_val, &right_val, |o| o.is_lt()),
            Operator::LessThanOrEqual => compare(&left_val, &right_val, |o| o.is_le()),
            Operator::GreaterThan => compare(&left_val, &right_val, |o| o.is_gt()),
            Operator::GreaterThanOrEqual => compare(&left_val, &right_val, |o| o.is_ge()),
            Operator::And | Operator::Or => unreachable!("handled above"),
        }
    }

    fn evaluate_unary_op(&self, operator: &UnaryOperator, expr: &Expression) -> Result<Value, ExpressionError> {
        let val = self.evaluate(expr)?;
        match operator {
            UnaryOperator::Negate => match val {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(eval_err(format!("Cannot negate {} value", other.type_name()))),
            },
            UnaryOperator::Not => Ok(Value::Boolean(!truthy(&val, "!")?)),
        }
    }
}

fn eval_err(message: impl Into<String>) -> ExpressionError {
    ExpressionError::Evaluation(message.into())
}

/// Booleans are themselves; null is false; everything else is a type error.
fn truthy(value: &Value, context: &str) -> Result<bool, ExpressionError> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(eval_err(format!(
            "{} expects a boolean, got {}",
            context,
            other.type_name()
        ))),
    }
}

/// `+` adds numbers and concatenates as soon as either side is a string.
fn add(left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(format!("{}{}", left.as_text(), right.as_text())))
        }
        _ => Err(eval_err(format!(
            "Cannot add {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn arithmetic(
    left: &Value,
    right: &Value,
    verb: &str,
    op: impl Fn(f64, f64) -> Result<f64, ExpressionError>,
) -> Result<Value, ExpressionError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => op(*a, *b).map(Value::Number),
        _ => Err(eval_err(format!(
            "Cannot {} {} and {}",
            verb,
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Object(_), _) | (Value::Array(_), _) => {
            JsonValue::from(left.clone()) == JsonValue::from(right.clone())
        }
        _ => left == right,
    }
}

fn compare(
    left: &Value,
    right: &Value,
    test: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, ExpressionError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| eval_err("Cannot compare NaN"))?,
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            return Err(eval_err(format!(
                "Cannot compare {} and {}",
                left.type_name(),
                right.type_name()
            )))
        }
    };
    Ok(Value::Boolean(test(ordering)))
}
