//! Built-in functions bound into every evaluation scope.

use super::context::EvalContext;
use super::value::Value;
use super::{EvalFailure, ExprErrorKind};

const BUILTINS: &[&str] = &[
    "len",
    "upper",
    "lower",
    "format",
    "contains",
    "always",
    "success",
    "failure",
    "cancelled",
];

pub(crate) fn call(
    name: &str,
    args: &[Value],
    ctx: &EvalContext,
) -> Result<Value, EvalFailure> {
    match name {
        "len" => {
            let [arg] = expect_arity::<1>(name, args)?;
            match arg {
                Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
                Value::List(items) => Ok(Value::Number(items.len() as f64)),
                Value::Map(entries) => Ok(Value::Number(entries.len() as f64)),
                other => Err(type_error(format!(
                    "len() expects a string, list or map, got {}",
                    other.type_name()
                ))),
            }
        }
        "upper" => {
            let [arg] = expect_arity::<1>(name, args)?;
            string_arg(name, arg).map(|s| Value::String(s.to_uppercase()))
        }
        "lower" => {
            let [arg] = expect_arity::<1>(name, args)?;
            string_arg(name, arg).map(|s| Value::String(s.to_lowercase()))
        }
        "format" => {
            if args.is_empty() {
                return Err(arity_error(name, "at least one argument"));
            }
            let template = string_arg(name, &args[0])?;
            format_template(template, &args[1..])
        }
        "contains" => {
            let [haystack, needle] = expect_arity::<2>(name, args)?;
            match haystack {
                Value::String(s) => Ok(Value::Bool(s.contains(&needle.render()))),
                Value::List(items) => Ok(Value::Bool(items.contains(needle))),
                Value::Map(entries) => {
                    Ok(Value::Bool(entries.contains_key(&needle.render())))
                }
                other => Err(type_error(format!(
                    "contains() expects a string, list or map, got {}",
                    other.type_name()
                ))),
            }
        }
        "always" => {
            expect_arity::<0>(name, args)?;
            Ok(Value::Bool(true))
        }
        "success" => {
            expect_arity::<0>(name, args)?;
            Ok(Value::Bool(!ctx.flags.failed && !ctx.flags.cancelled))
        }
        "failure" => {
            expect_arity::<0>(name, args)?;
            Ok(Value::Bool(ctx.flags.failed))
        }
        "cancelled" => {
            expect_arity::<0>(name, args)?;
            Ok(Value::Bool(ctx.flags.cancelled))
        }
        _ => Err(EvalFailure {
            kind: ExprErrorKind::Evaluation,
            message: format!("unknown function '{name}'"),
            suggestion: Some(format!("available functions: {}", BUILTINS.join(", "))),
        }),
    }
}

/// Substitute `{0}`, `{1}`… placeholders; `{{` and `}}` are literal braces.
fn format_template(template: &str, args: &[Value]) -> Result<Value, EvalFailure> {
    let mut result = String::new();
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                result.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                result.push('}');
            }
            '{' => {
                let mut digits = String::new();
                for d in chars.by_ref() {
                    if d == '}' {
                        break;
                    }
                    digits.push(d);
                }
                let index: usize = digits.parse().map_err(|_| {
                    type_error(format!("format() placeholder '{{{digits}}}' is not an index"))
                })?;
                let arg = args.get(index).ok_or_else(|| {
                    type_error(format!(
                        "format() placeholder {{{index}}} out of range ({} argument(s) given)",
                        args.len()
                    ))
                })?;
                result.push_str(&arg.render());
            }
            _ => result.push(ch),
        }
    }
    Ok(Value::String(result))
}

fn expect_arity<'a, const N: usize>(
    name: &str,
    args: &'a [Value],
) -> Result<&'a [Value; N], EvalFailure> {
    args.try_into()
        .map_err(|_| arity_error(name, &format!("{N} argument(s)")))
}

fn arity_error(name: &str, expected: &str) -> EvalFailure {
    EvalFailure {
        kind: ExprErrorKind::Evaluation,
        message: format!("{name}() expects {expected}"),
        suggestion: None,
    }
}

fn type_error(message: String) -> EvalFailure {
    EvalFailure {
        kind: ExprErrorKind::Type,
        message,
        suggestion: None,
    }
}

fn string_arg<'a>(name: &str, arg: &'a Value) -> Result<&'a String, EvalFailure> {
    match arg {
        Value::String(s) => Ok(s),
        other => Err(type_error(format!(
            "{name}() expects a string, got {}",
            other.type_name()
        ))),
    }
}
