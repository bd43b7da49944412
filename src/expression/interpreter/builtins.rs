use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::super::ast::{format_number, Value};

/// Type for function implementations in the interpreter
pub type BuiltinFunction = fn(Vec<Value>) -> Result<Value, String>;

/// Every function name an expression may call.
pub const BUILTIN_NAMES: [&str; 18] = [
    "min",
    "max",
    "clamp",
    "abs",
    "round",
    "floor",
    "ceil",
    "concat",
    "upper",
    "lower",
    "trim",
    "len",
    "contains",
    "starts_with",
    "coalesce",
    "to_string",
    "to_number",
    "to_boolean",
];

static BUILTINS: Lazy<HashMap<&'static str, BuiltinFunction>> = Lazy::new(|| {
    let mut functions: HashMap<&'static str, BuiltinFunction> = HashMap::new();

    // Math functions
    functions.insert("min", |args| {
        let [a, b] = numbers::<2>("min", &args)?;
        Ok(Value::Number(a.min(b)))
    });
    functions.insert("max", |args| {
        let [a, b] = numbers::<2>("max", &args)?;
        Ok(Value::Number(a.max(b)))
    });
    functions.insert("clamp", |args| {
        let [value, min, max] = numbers::<3>("clamp", &args)?;
        Ok(Value::Number(value.max(min).min(max)))
    });
    functions.insert("abs", |args| {
        let [n] = numbers::<1>("abs", &args)?;
        Ok(Value::Number(n.abs()))
    });
    functions.insert("round", |args| {
        let [n] = numbers::<1>("round", &args)?;
        Ok(Value::Number(n.round()))
    });
    functions.insert("floor", |args| {
        let [n] = numbers::<1>("floor", &args)?;
        Ok(Value::Number(n.floor()))
    });
    functions.insert("ceil", |args| {
        let [n] = numbers::<1>("ceil", &args)?;
        Ok(Value::Number(n.ceil()))
    });

    // String functions
    functions.insert("concat", |args| {
        Ok(Value::String(args.iter().map(Value::as_text).collect()))
    });
    functions.insert("upper", |args| {
        let s = single_string("upper", &args)?;
        Ok(Value::String(s.to_uppercase()))
    });
    functions.insert("lower", |args| {
        let s = single_string("lower", &args)?;
        Ok(Value::String(s.to_lowercase()))
    });
    functions.insert("trim", |args| {
        let s = single_string("trim", &args)?;
        Ok(Value::String(s.trim().to_string()))
    });
    functions.insert("len", |args| {
        arity("len", &args, 1)?;
        let n = match &args[0] {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            Value::Null => 0,
            other => return Err(format!("len() cannot measure {}", other.type_name())),
        };
        Ok(Value::Number(n as f64))
    });
    functions.insert("contains", |args| {
        arity("contains", &args, 2)?;
        match (&args[0], &args[1]) {
            (Value::String(haystack), Value::String(needle)) => {
                Ok(Value::Boolean(haystack.contains(needle.as_str())))
            }
            (Value::Array(items), needle) => {
                let needle = serde_json::Value::from(needle.clone());
                Ok(Value::Boolean(items.contains(&needle)))
            }
            (Value::Null, _) => Ok(Value::Boolean(false)),
            _ => Err("contains() requires a string or array".to_string()),
        }
    });
    functions.insert("starts_with", |args| {
        arity("starts_with", &args, 2)?;
        match (&args[0], &args[1]) {
            (Value::String(s), Value::String(prefix)) => {
                Ok(Value::Boolean(s.starts_with(prefix.as_str())))
            }
            (Value::Null, _) => Ok(Value::Boolean(false)),
            _ => Err("starts_with() requires string arguments".to_string()),
        }
    });

    // Conversion functions
    functions.insert("coalesce", |args| {
        Ok(args
            .into_iter()
            .find(|v| !matches!(v, Value::Null))
            .unwrap_or(Value::Null))
    });
    functions.insert("to_string", |args| {
        arity("to_string", &args, 1)?;
        Ok(Value::String(match &args[0] {
            Value::Number(n) => format_number(*n),
            other => other.as_text(),
        }))
    });
    functions.insert("to_number", |args| {
        arity("to_number", &args, 1)?;
        match &args[0] {
            Value::Number(n) => Ok(Value::Number(*n)),
            Value::Boolean(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| format!("to_number() cannot convert '{}'", s)),
            Value::Null => Ok(Value::Null),
            other => Err(format!("to_number() cannot convert {}", other.type_name())),
        }
    });
    functions.insert("to_boolean", |args| {
        arity("to_boolean", &args, 1)?;
        Ok(Value::Boolean(match &args[0] {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty() && s != "false",
            Value::Null => false,
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }))
    });

    functions
});

/// Looks up an allow-listed builtin by name.
pub fn builtin(name: &str) -> Option<BuiltinFunction> {
    BUILTINS.get(name).copied()
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!(
            "{}() requires exactly {} argument{}",
            name,
            expected,
            if expected == 1 { "" } else { "s" }
        ));
    }
    Ok(())
}

fn numbers<const N: usize>(name: &str, args: &[Value]) -> Result<[f64; N], String> {
    arity(name, args, N)?;
    let mut out = [0.0; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = match arg {
            Value::Number(n) => *n,
            _ => return Err(format!("{}() requires numeric arguments", name)),
        };
    }
    Ok(out)
}

fn single_string<'a>(name: &str, args: &'a [Value]) -> Result<&'a str, String> {
    arity(name, args, 1)?;
    match &args[0] {
        Value::String(s) => Ok(s),
        _ => Err(format!("{}() requires a string argument", name)),
    }
}
