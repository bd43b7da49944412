//! Abstract Syntax Tree (AST) definitions for the expression language.

use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;

/// Represents a value in the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A numeric value (floating point)
    Number(f64),
    /// A boolean value
    Boolean(bool),
    /// A string value
    String(String),
    /// A null value
    Null,
    /// A JSON object value
    Object(serde_json::Map<String, JsonValue>),
    /// A JSON array value
    Array(Vec<JsonValue>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Null => "null",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }

    /// Text form used by string concatenation. Null renders as empty.
    pub fn as_text(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Object(_) | Value::Array(_) => JsonValue::from(self.clone()).to_string(),
        }
    }
}

/// Integral floats print without a fractional part.
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Null => write!(f, "null"),
            Value::Object(_) => write!(f, "<object>"),
            Value::Array(_) => write!(f, "<array>"),
        }
    }
}

impl From<Value> for JsonValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    JsonValue::from(n as i64)
                } else {
                    serde_json::Number::from_f64(n)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null)
                }
            }
            Value::Boolean(b) => JsonValue::Bool(b),
            Value::String(s) => JsonValue::String(s),
            Value::Null => JsonValue::Null,
            Value::Object(o) => JsonValue::Object(o),
            Value::Array(a) => JsonValue::Array(a),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            JsonValue::Bool(b) => Value::Boolean(b),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Null => Value::Null,
            JsonValue::Object(o) => Value::Object(o),
            JsonValue::Array(a) => Value::Array(a),
        }
    }
}

/// Represents a binary operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operator {
    /// Addition or string concatenation (+)
    Add,
    /// Subtraction (-)
    Subtract,
    /// Multiplication (*)
    Multiply,
    /// Division (/)
    Divide,
    /// Remainder (%)
    Modulo,
    /// Power (^)
    Power,
    /// Equality (==)
    Equal,
    /// Inequality (!=)
    NotEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal (<=)
    LessThanOrEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal (>=)
    GreaterThanOrEqual,
    /// Logical AND (&&)
    And,
    /// Logical OR (||)
    Or,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::Power => "^",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
        };
        f.write_str(symbol)
    }
}

/// Represents a unary operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOperator {
    /// Negation (-)
    Negate,
    /// Logical NOT (!)
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOperator::Negate => write!(f, "-"),
            UnaryOperator::Not => write!(f, "!"),
        }
    }
}

/// Represents an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A literal value
    Literal(Value),

    /// A variable reference
    Variable(String),

    /// A field access expression (e.g., obj.field)
    FieldAccess {
        object: Box<Expression>,
        field: String,
    },

    /// A binary operation (e.g., a + b)
    BinaryOp {
        left: Box<Expression>,
        operator: Operator,
        right: Box<Expression>,
    },

    /// A unary operation (e.g., -a, !b)
    UnaryOp {
        operator: UnaryOperator,
        expr: Box<Expression>,
    },

    /// A call to an allow-listed builtin (e.g., upper(name))
    FunctionCall { name: String, args: Vec<Expression> },

    /// Ternary conditional (c ? a : b)
    Conditional {
        condition: Box<Expression>,
        then_branch: Box<Expression>,
        else_branch: Box<Expression>,
    },
}

impl Expression {
    /// Every free variable the expression reads.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Variable(name) => {
                out.insert(name.clone());
            }
            Expression::FieldAccess { object, .. } => object.collect_variables(out),
            Expression::BinaryOp { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expression::UnaryOp { expr, .. } => expr.collect_variables(out),
            Expression::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
            Expression::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_variables(out);
                then_branch.collect_variables(out);
                else_branch.collect_variables(out);
            }
        }
    }

    /// Names of every function the expression calls.
    pub fn functions(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_functions(&mut out);
        out
    }

    fn collect_functions(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Literal(_) | Expression::Variable(_) => {}
            Expression::FieldAccess { object, .. } => object.collect_functions(out),
            Expression::BinaryOp { left, right, .. } => {
                left.collect_functions(out);
                right.collect_functions(out);
            }
            Expression::UnaryOp { expr, .. } => expr.collect_functions(out),
            Expression::FunctionCall { name, args } => {
                out.insert(name.clone());
                for arg in args {
                    arg.collect_functions(out);
                }
            }
            Expression::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_functions(out);
                then_branch.collect_functions(out);
                else_branch.collect_functions(out);
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => write!(f, "{}", value),
            Expression::Variable(name) => write!(f, "{}", name),
            Expression::FieldAccess { object, field } => write!(f, "{}.{}", object, field),
            Expression::BinaryOp {
                left,
                operator,
                right,
            } => write!(f, "({} {} {})", left, operator, right),
            Expression::UnaryOp { operator, expr } => write!(f, "{}({})", operator, expr),
            Expression::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::Conditional {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "({} ? {} : {})", condition, then_branch, else_branch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_free_variables() {
        let expr = Expression::Conditional {
            condition: Box::new(Expression::Variable("done".into())),
            then_branch: Box::new(Expression::FieldAccess {
                object: Box::new(Expression::Variable("meta".into())),
                field: "label".into(),
            }),
            else_branch: Box::new(Expression::FunctionCall {
                name: "upper".into(),
                args: vec![Expression::Variable("title".into())],
            }),
        };
        let vars: Vec<_> = expr.variables().into_iter().collect();
        assert_eq!(vars, vec!["done", "meta", "title"]);
        assert!(expr.functions().contains("upper"));
    }

    #[test]
    fn integral_numbers_convert_to_json_integers() {
        assert_eq!(JsonValue::from(Value::Number(3.0)), serde_json::json!(3));
        assert_eq!(JsonValue::from(Value::Number(2.5)), serde_json::json!(2.5));
        assert_eq!(JsonValue::from(Value::Number(f64::NAN)), JsonValue::Null);
    }
}
