// Expression Engine Evaluator
// Evaluates expression trees against an explicit job context

use crate::expression::functions::BuiltinFunctions;
use crate::expression::lexer::{extract_expressions, Segment};
use crate::expression::parser::{BinaryOp, Expr, ExprParser, Reference, ReferencePart, UnaryOp};
use crate::expression::value::Value;

use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// A reference to a context entry that does not exist (yet)
    #[error("unresolved reference '{0}'")]
    Unresolved(String),
    /// The expression is well formed but cannot be evaluated
    #[error("evaluation error: {0}")]
    Invalid(String),
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        EvalError::Invalid(message.into())
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, EvalError::Unresolved(_))
    }
}

/// Context for expression evaluation
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    /// Axis bindings of the current job
    pub matrix: IndexMap<String, Value>,

    /// Steps of the current job that reached a terminal state, by id
    pub steps: IndexMap<String, StepContext>,

    /// Merged workflow, job and step environment
    pub env: IndexMap<String, String>,

    /// Triggering event
    pub github: GithubContext,

    /// Aggregate status of the current job so far
    pub job: JobStatusContext,
}

#[derive(Debug, Clone, Default)]
pub struct GithubContext {
    pub event_name: String,
    pub git_ref: Option<String>,
    pub workflow: Option<String>,
    pub job: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct JobStatusContext {
    pub failed: bool,
    pub cancelled: bool,
}

impl JobStatusContext {
    /// Status string exposed as `job.status`
    pub fn status(&self) -> &'static str {
        if self.cancelled {
            "cancelled"
        } else if self.failed {
            "failure"
        } else {
            "success"
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepContext {
    /// Outputs the step produced
    pub outputs: IndexMap<String, String>,
    /// Result before continue-on-error is applied: success, failure, skipped, cancelled
    pub outcome: String,
    /// Result after continue-on-error is applied
    pub conclusion: String,
}

/// Expression evaluator
pub struct Evaluator<'a> {
    context: &'a ExpressionContext,
    functions: BuiltinFunctions,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a ExpressionContext) -> Self {
        Self {
            context,
            functions: BuiltinFunctions::new(),
        }
    }

    /// Evaluate an expression
    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),

            Expr::Reference(reference) => self.eval_reference(reference),

            Expr::FunctionCall { name, args } => {
                let evaluated: Result<Vec<Value>, EvalError> =
                    args.iter().map(|a| self.eval(a)).collect();
                self.functions.call(name, evaluated?, self.context)
            }

            Expr::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                Self::index(&obj, &idx).ok_or_else(|| {
                    let base = match object.as_ref() {
                        Expr::FunctionCall { name, .. } => format!("{}(...)", name),
                        Expr::Reference(reference) => reference.to_string(),
                        _ => "(...)".to_string(),
                    };
                    EvalError::Unresolved(format!("{}.{}", base, idx.as_string()))
                })
            }

            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => Ok(Value::Bool(!self.eval(expr)?.is_truthy())),

            Expr::Binary { op, left, right } => {
                let left_val = self.eval(left)?;
                if op.short_circuits() {
                    // && and || yield an operand, not a bool
                    let decided = match op {
                        BinaryOp::And => !left_val.is_truthy(),
                        _ => left_val.is_truthy(),
                    };
                    return if decided {
                        Ok(left_val)
                    } else {
                        self.eval(right)
                    };
                }
                let right_val = self.eval(right)?;
                Ok(Value::Bool(Self::compare(*op, &left_val, &right_val)))
            }
        }
    }

    fn eval_reference(&self, reference: &Reference) -> Result<Value, EvalError> {
        let mut parts = reference.parts.iter();

        let Some(ReferencePart::Property(root)) = parts.next() else {
            return Err(EvalError::new("reference must start with a context name"));
        };

        let mut current = self.lookup_context(root)?;

        for part in parts {
            let key = match part {
                ReferencePart::Property(name) => Value::String(name.clone()),
                ReferencePart::Index(expr) => self.eval(expr)?,
            };

            current = Self::index(&current, &key)
                .ok_or_else(|| EvalError::Unresolved(reference.to_string()))?;
        }

        Ok(current)
    }

    fn lookup_context(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "matrix" => Ok(Value::Object(self.context.matrix.clone())),
            "env" => Ok(Value::Object(
                self.context
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )),
            "steps" => Ok(Value::Object(
                self.context
                    .steps
                    .iter()
                    .map(|(id, step)| (id.clone(), Self::step_to_value(step)))
                    .collect(),
            )),
            "github" => Ok(self.github_to_value()),
            "job" => {
                let mut map = IndexMap::new();
                map.insert("status".to_string(), Value::from(self.context.job.status()));
                Ok(Value::Object(map))
            }
            _ => Err(EvalError::new(format!("unknown context: {}", name))),
        }
    }

    fn step_to_value(step: &StepContext) -> Value {
        let mut map = IndexMap::new();
        map.insert(
            "outputs".to_string(),
            Value::Object(
                step.outputs
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        map.insert("outcome".to_string(), Value::String(step.outcome.clone()));
        map.insert(
            "conclusion".to_string(),
            Value::String(step.conclusion.clone()),
        );
        Value::Object(map)
    }

    fn github_to_value(&self) -> Value {
        let github = &self.context.github;
        let mut map = IndexMap::new();
        map.insert("event_name".to_string(), Value::from(github.event_name.as_str()));
        if let Some(git_ref) = &github.git_ref {
            map.insert("ref".to_string(), Value::from(git_ref.as_str()));
            if let Some(branch) = git_ref.strip_prefix("refs/heads/") {
                map.insert("ref_name".to_string(), Value::from(branch));
            }
        }
        if let Some(workflow) = &github.workflow {
            map.insert("workflow".to_string(), Value::from(workflow.as_str()));
        }
        if let Some(job) = &github.job {
            map.insert("job".to_string(), Value::from(job.as_str()));
        }
        Value::Object(map)
    }

    /// Look up a key in an object or array; `None` when absent.
    fn index(object: &Value, index: &Value) -> Option<Value> {
        match (object, index) {
            (Value::Object(map), key) => {
                let key = key.as_string();
                map.get(&key).cloned().or_else(|| {
                    // Context keys are case-insensitive
                    map.iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(&key))
                        .map(|(_, v)| v.clone())
                })
            }
            (Value::Array(items), Value::Number(n)) if *n >= 0.0 => items.get(*n as usize).cloned(),
            _ => None,
        }
    }

    fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
        match op {
            BinaryOp::Eq => left.loosely_equals(right),
            BinaryOp::Ne => !left.loosely_equals(right),
            _ => {
                let ordering = match (left, right) {
                    (Value::String(a), Value::String(b)) => {
                        Some(a.to_lowercase().cmp(&b.to_lowercase()))
                    }
                    _ => match (left.as_number(), right.as_number()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => None,
                    },
                };

                let Some(ordering) = ordering else {
                    return false;
                };

                match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    BinaryOp::Ge => ordering.is_ge(),
                    _ => false,
                }
            }
        }
    }
}

/// High-level expression engine
pub struct ExpressionEngine {
    context: ExpressionContext,
}

impl ExpressionEngine {
    pub fn new(context: ExpressionContext) -> Self {
        Self { context }
    }

    /// Evaluate a single expression, with or without `${{ }}` delimiters
    pub fn evaluate(&self, expr: &str) -> Result<Value, EvalError> {
        let ast = Self::parse(expr)?;
        Evaluator::new(&self.context).eval(&ast)
    }

    /// Parse an expression, stripping `${{ }}` delimiters
    pub fn parse(expr: &str) -> Result<Expr, EvalError> {
        let body = crate::expression::lexer::strip_delimiters(expr);
        ExprParser::parse_str(body).map_err(|e| EvalError::new(format!("'{}': {}", body, e)))
    }

    /// Substitute every `${{ }}` span in a template with its string value
    pub fn interpolate(&self, template: &str) -> Result<String, EvalError> {
        let segments = extract_expressions(template).map_err(|e| EvalError::new(e.to_string()))?;
        let mut result = String::with_capacity(template.len());

        for segment in segments {
            match segment {
                Segment::Text(text) => result.push_str(&text),
                Segment::Expression(expr) => {
                    let value = self.evaluate(&expr)?;
                    result.push_str(&value.as_string());
                }
            }
        }

        Ok(result)
    }

    pub fn context_mut(&mut self) -> &mut ExpressionContext {
        &mut self.context
    }

    pub fn context(&self) -> &ExpressionContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_context() -> ExpressionContext {
        let mut ctx = ExpressionContext::default();
        ctx.matrix.insert("os".to_string(), Value::from("ubuntu"));
        ctx.matrix.insert("rust".to_string(), Value::from("stable"));
        ctx.env.insert("CARGO_TERM_COLOR".to_string(), "always".to_string());
        ctx.github.event_name = "push".to_string();
        ctx.github.git_ref = Some("refs/heads/main".to_string());

        let mut msrv = StepContext {
            outcome: "success".to_string(),
            conclusion: "success".to_string(),
            ..Default::default()
        };
        msrv.outputs.insert("content".to_string(), "1.70".to_string());
        ctx.steps.insert("msrv".to_string(), msrv);

        ctx.steps.insert(
            "skipped".to_string(),
            StepContext {
                outcome: "skipped".to_string(),
                conclusion: "skipped".to_string(),
                ..Default::default()
            },
        );
        ctx
    }

    fn eval(expr: &str) -> Result<Value, EvalError> {
        ExpressionEngine::new(make_context()).evaluate(expr)
    }

    #[test]
    fn test_eval_matrix_comparison() {
        assert_eq!(eval("matrix.rust == 'stable'").unwrap(), Value::Bool(true));
        assert_eq!(eval("matrix.rust != 'stable'").unwrap(), Value::Bool(false));
        assert_eq!(eval("matrix['os'] == 'UBUNTU'").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_eval_step_outputs_and_outcome() {
        assert_eq!(eval("steps.msrv.outputs.content").unwrap(), Value::from("1.70"));
        assert_eq!(
            eval("steps.skipped.outcome == 'skipped'").unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_missing_output_is_unresolved() {
        let err = eval("steps.skipped.outputs.content").unwrap_err();
        assert_eq!(
            err,
            EvalError::Unresolved("steps.skipped.outputs.content".to_string())
        );

        assert!(eval("steps.never.outputs.content == 'x'")
            .unwrap_err()
            .is_unresolved());
        assert!(eval("matrix.arch").unwrap_err().is_unresolved());
    }

    #[test]
    fn test_missing_key_on_computed_value_is_unresolved() {
        let mut ctx = make_context();
        let mut meta = StepContext::default();
        meta.outputs
            .insert("json".to_string(), r#"{"channel":"beta"}"#.to_string());
        ctx.steps.insert("meta".to_string(), meta);
        let engine = ExpressionEngine::new(ctx);

        assert_eq!(
            engine.evaluate("fromJSON(steps.meta.outputs.json).channel").unwrap(),
            Value::from("beta")
        );
        assert_eq!(
            engine
                .evaluate("fromJSON(steps.meta.outputs.json).missing")
                .unwrap_err(),
            EvalError::Unresolved("fromJSON(...).missing".to_string())
        );
        assert!(engine
            .interpolate("${{ fromJSON(steps.meta.outputs.json).missing }}")
            .unwrap_err()
            .is_unresolved());
    }

    #[test]
    fn test_short_circuit_skips_missing_reference() {
        assert_eq!(
            eval("matrix.rust == 'stable' || steps.never.outputs.x").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval("matrix.rust == 'beta' && steps.never.outputs.x").unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_unknown_context_is_invalid() {
        let err = eval("secrets.TOKEN").unwrap_err();
        assert!(!err.is_unresolved());
    }

    #[test]
    fn test_eval_github_and_job() {
        assert_eq!(eval("github.event_name").unwrap(), Value::from("push"));
        assert_eq!(eval("github.ref_name").unwrap(), Value::from("main"));
        assert_eq!(eval("job.status").unwrap(), Value::from("success"));
        assert_eq!(eval("env.CARGO_TERM_COLOR").unwrap(), Value::from("always"));
    }

    #[test]
    fn test_eval_comparison_operators() {
        assert_eq!(eval("steps.msrv.outputs.content >= 1.65").unwrap(), Value::Bool(true));
        assert_eq!(eval("'abc' < 'abd'").unwrap(), Value::Bool(true));
        assert_eq!(eval("!(1 > 2)").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_interpolate() {
        let engine = ExpressionEngine::new(make_context());
        assert_eq!(
            engine
                .interpolate("rustup toolchain install ${{ matrix.rust }} on ${{ matrix.os }}")
                .unwrap(),
            "rustup toolchain install stable on ubuntu"
        );
        assert_eq!(engine.interpolate("plain").unwrap(), "plain");
        assert!(engine
            .interpolate("${{ steps.skipped.outputs.content }}")
            .unwrap_err()
            .is_unresolved());
    }

    #[test]
    fn test_parse_error_is_invalid() {
        let err = eval("${{ matrix.os == }}").unwrap_err();
        assert!(matches!(err, EvalError::Invalid(_)));
    }
}
