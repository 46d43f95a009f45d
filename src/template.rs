//! Template engine for dynamic responses.
//!
//! Uses Handlebars call expressions bound to a single request:
//!
//! ```text
//! {"id": "{{ requestVar "id" }}", "ref": "{{ requestBody "ref" (uuid "ulid") }}"}
//! ```
//!
//! A fresh registry is built for every request, with each function holding a
//! reference to that request's [`EvaluationContext`]. Nothing is shared or
//! cached between requests.

use crate::context::EvaluationContext;
use crate::error::EvalError;
use crate::generators::{generate_id, generate_time, IdKind, TimeFormat};
use handlebars::{
    Context, Handlebars, Helper, HelperDef, RenderContext, RenderError, RenderErrorReason,
    ScopedJson,
};
use serde_json::Value;

/// Marker that introduces an embedded expression.
pub const EXPRESSION_MARKER: &str = "{{";

/// Whether `value` contains anything that needs evaluating.
pub fn has_expression(value: &str) -> bool {
    value.contains(EXPRESSION_MARKER)
}

/// Functions callable from templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    RequestVar,
    RequestQuery,
    RequestHeader,
    RequestBody,
    Uuid,
    Time,
}

const FUNCTIONS: &[(&str, Function)] = &[
    ("requestVar", Function::RequestVar),
    ("requestQuery", Function::RequestQuery),
    ("requestParameter", Function::RequestQuery),
    ("requestHeader", Function::RequestHeader),
    ("requestBody", Function::RequestBody),
    ("uuid", Function::Uuid),
    ("time", Function::Time),
];

/// A template function bound to one request.
struct BoundFunction<'a> {
    name: &'static str,
    function: Function,
    ctx: &'a EvaluationContext,
}

impl BoundFunction<'_> {
    fn evaluate(&self, args: &[Value]) -> Result<Value, EvalError> {
        match self.function {
            Function::RequestVar => {
                let name = self.single_string(args)?;
                Ok(Value::String(self.ctx.path_variable(name).to_string()))
            }
            Function::RequestQuery => {
                let name = self.single_string(args)?;
                Ok(Value::String(self.ctx.query_param(name).to_string()))
            }
            Function::RequestHeader => {
                let name = self.single_string(args)?;
                Ok(Value::String(self.ctx.header(name)))
            }
            Function::RequestBody => self.ctx.body_field(args),
            Function::Uuid => {
                let kind = self.optional_string(args)?.map(IdKind::parse).unwrap_or_default();
                Ok(Value::String(generate_id(kind)))
            }
            Function::Time => {
                let format = self
                    .optional_string(args)?
                    .map(TimeFormat::parse)
                    .unwrap_or_default();
                Ok(Value::String(generate_time(format)))
            }
        }
    }

    fn single_string<'v>(&self, args: &'v [Value]) -> Result<&'v str, EvalError> {
        match args {
            [Value::String(s)] => Ok(s),
            [_] => Err(EvalError::invalid_argument(self.name, "argument must be a string")),
            _ => Err(EvalError::invalid_argument(
                self.name,
                format!("expected 1 argument, got {}", args.len()),
            )),
        }
    }

    fn optional_string<'v>(&self, args: &'v [Value]) -> Result<Option<&'v str>, EvalError> {
        match args {
            [] => Ok(None),
            [Value::String(s)] => Ok(Some(s)),
            [_] => Err(EvalError::invalid_argument(self.name, "argument must be a string")),
            _ => Err(EvalError::invalid_argument(
                self.name,
                format!("expected at most 1 argument, got {}", args.len()),
            )),
        }
    }
}

impl HelperDef for BoundFunction<'_> {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let args: Vec<Value> = h.params().iter().map(|p| p.value().clone()).collect();
        self.evaluate(&args)
            .map(ScopedJson::Derived)
            .map_err(|e| RenderErrorReason::NestedError(Box::new(e)).into())
    }
}

/// Renders templates against one request.
pub struct Evaluator<'a> {
    handlebars: Handlebars<'a>,
}

impl<'a> Evaluator<'a> {
    /// Bind the template functions to `ctx`.
    pub fn new(ctx: &'a EvaluationContext) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        // Don't escape HTML (we're rendering JSON and headers, not markup)
        handlebars.register_escape_fn(handlebars::no_escape);

        for &(name, function) in FUNCTIONS {
            handlebars.register_helper(name, Box::new(BoundFunction { name, function, ctx }));
        }

        Self { handlebars }
    }

    /// Render `template`, substituting every expression.
    pub fn render(&self, template: &str) -> Result<String, EvalError> {
        if !has_expression(template) {
            return Ok(template.to_string());
        }

        self.handlebars
            .render_template(template, &())
            .map_err(classify)
    }
}

/// Map a Handlebars failure back onto the evaluation error taxonomy.
fn classify(err: RenderError) -> EvalError {
    if let RenderErrorReason::NestedError(inner) = err.reason() {
        if let Some(eval) = inner.downcast_ref::<EvalError>() {
            return eval.clone();
        }
    }
    EvalError::TemplateSyntax(err.to_string())
}
