//! # Expression Language
//!
//! The sandboxed language virtual fields are written in.
//!
//! ## Components
//!
//! * `ast` - Abstract Syntax Tree definitions
//! * `parser` - pest-based parser producing the AST
//! * `interpreter` - Evaluator plus the allow-listed builtins
//!
//! Expressions can read the bindings they are given and call the builtins in
//! [`BUILTIN_NAMES`]. Nothing else is reachable, so evaluating a schema
//! author's expression cannot touch the host.

pub mod ast;
pub mod interpreter;
pub mod parser;

pub use ast::{Expression, Operator, UnaryOperator, Value};
pub use interpreter::{Interpreter, BUILTIN_NAMES};
pub use parser::ExpressionParser;

use std::collections::{BTreeSet, HashMap};

/// Failure while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),
}

/// An expression parsed once at schema compile time and evaluated per row.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    pub source: String,
    pub ast: Expression,
}

impl CompiledExpression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let ast = ExpressionParser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// Free variables the expression reads.
    pub fn variables(&self) -> BTreeSet<String> {
        self.ast.variables()
    }

    /// Called function names that are not allow-listed builtins.
    pub fn unknown_functions(&self) -> Vec<String> {
        self.ast
            .functions()
            .into_iter()
            .filter(|name| !BUILTIN_NAMES.contains(&name.as_str()))
            .collect()
    }

    pub fn evaluate(&self, variables: HashMap<String, Value>) -> Result<Value, ExpressionError> {
        Interpreter::with_variables(variables).evaluate(&self.ast)
    }
}
