// Built-in Functions for Workflow Expressions
// String helpers, JSON conversion and job status checks

use crate::expression::evaluator::{EvalError, ExpressionContext};
use crate::expression::value::Value;

/// Registry of built-in functions
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    /// Call a built-in function; names are case-insensitive
    pub fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        context: &ExpressionContext,
    ) -> Result<Value, EvalError> {
        match name.to_lowercase().as_str() {
            // String functions
            "contains" => self.fn_contains(args),
            "startswith" => self.fn_startswith(args),
            "endswith" => self.fn_endswith(args),
            "format" => self.fn_format(args),
            "join" => self.fn_join(args),

            // Conversion functions
            "tojson" => self.fn_to_json(args),
            "fromjson" => self.fn_from_json(args),

            // Status functions
            "success" => {
                self.require_args(&args, 0, "success")?;
                Ok(Value::Bool(!context.job.failed && !context.job.cancelled))
            }
            "failure" => {
                self.require_args(&args, 0, "failure")?;
                Ok(Value::Bool(context.job.failed))
            }
            "cancelled" => {
                self.require_args(&args, 0, "cancelled")?;
                Ok(Value::Bool(context.job.cancelled))
            }
            "always" => {
                self.require_args(&args, 0, "always")?;
                Ok(Value::Bool(true))
            }

            _ => Err(EvalError::new(format!("unknown function: {}", name))),
        }
    }

    fn fn_contains(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "contains")?;

        match (&args[0], &args[1]) {
            (Value::Array(items), needle) => {
                Ok(Value::Bool(items.iter().any(|item| item.loosely_equals(needle))))
            }
            (haystack, needle) => Ok(Value::Bool(
                haystack
                    .as_string()
                    .to_lowercase()
                    .contains(&needle.as_string().to_lowercase()),
            )),
        }
    }

    fn fn_startswith(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "startsWith")?;
        let s = args[0].as_string().to_lowercase();
        let prefix = args[1].as_string().to_lowercase();
        Ok(Value::Bool(s.starts_with(&prefix)))
    }

    fn fn_endswith(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "endsWith")?;
        let s = args[0].as_string().to_lowercase();
        let suffix = args[1].as_string().to_lowercase();
        Ok(Value::Bool(s.ends_with(&suffix)))
    }

    /// `format('{0} on {1}', a, b)`; `{{` and `}}` are literal braces
    fn fn_format(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let Some((template, rest)) = args.split_first() else {
            return Err(EvalError::new("format() requires at least 1 argument"));
        };

        let template = template.as_string();
        let mut result = String::with_capacity(template.len());
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
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                        digits.push(c);
                    }
                    let index: usize = digits.parse().map_err(|_| {
                        EvalError::new(format!("format(): invalid placeholder '{{{}}}'", digits))
                    })?;
                    let arg = rest.get(index).ok_or_else(|| {
                        EvalError::new(format!("format(): no argument for '{{{}}}'", index))
                    })?;
                    result.push_str(&arg.as_string());
                }
                c => result.push(c),
            }
        }

        Ok(Value::String(result))
    }

    fn fn_join(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        if args.is_empty() || args.len() > 2 {
            return Err(EvalError::new("join() requires 1 or 2 arguments"));
        }

        let separator = args.get(1).map(Value::as_string).unwrap_or_else(|| ",".to_string());

        match &args[0] {
            Value::Array(items) => {
                let strings: Vec<String> = items.iter().map(Value::as_string).collect();
                Ok(Value::String(strings.join(&separator)))
            }
            other => Ok(Value::String(other.as_string())),
        }
    }

    fn fn_to_json(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "toJSON")?;
        let json = serde_json::Value::from(&args[0]);
        serde_json::to_string_pretty(&json)
            .map(Value::String)
            .map_err(|e| EvalError::new(format!("toJSON(): {}", e)))
    }

    fn fn_from_json(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "fromJSON")?;
        let text = args[0].as_string();
        serde_json::from_str::<serde_json::Value>(&text)
            .map(|json| Value::from(&json))
            .map_err(|e| EvalError::new(format!("fromJSON(): {}", e)))
    }

    fn require_args(&self, args: &[Value], count: usize, name: &str) -> Result<(), EvalError> {
        if args.len() != count {
            return Err(EvalError::new(format!(
                "{}() requires {} argument(s), got {}",
                name,
                count,
                args.len()
            )));
        }
        Ok(())
    }
}

impl Default for BuiltinFunctions {
    fn default() -> Self {
        Self::new()
    }
}
