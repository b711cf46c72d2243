//! Calculator tool definition.
//!
//! Evaluates arithmetic either from a free-form expression (`expr`) or from a
//! single structured operation (`operation`, `a`, `b`). Pure and
//! deterministic: the same arguments always produce the same result.

pub mod expression;

use async_trait::async_trait;
use schemars::{JsonSchema, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::{debug, instrument};

use self::expression::{BinaryOp, EvalError};
use crate::domains::tools::cancellation::CancellationSignal;
use crate::domains::tools::contract::{
    Arguments, InvocationContext, Tool, ToolDescriptor, ToolOutput, decode_validated, describe,
    parse_arguments, to_arguments,
};
use crate::domains::tools::error::{ExecutionError, ValidationError};

const MAX_EXPRESSION_LEN: usize = 1024;

/// Largest integer magnitude that an f64 represents exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

// ============================================================================
// Tool Parameters
// ============================================================================

/// A structured binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Modulo,
}

impl From<Operation> for BinaryOp {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Add => BinaryOp::Add,
            Operation::Subtract => BinaryOp::Subtract,
            Operation::Multiply => BinaryOp::Multiply,
            Operation::Divide => BinaryOp::Divide,
            Operation::Power => BinaryOp::Power,
            Operation::Modulo => BinaryOp::Modulo,
        }
    }
}

/// Parameters for the calculator tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(transform = advertise_expression_alias)]
pub struct CalculatorParams {
    /// Expression to evaluate, e.g. "2 + 3 * 4" or "sqrt(16)".
    #[schemars(
        description = "Mathematical expression. Supports + - * / % ^, parentheses, pi, e and sqrt, sin, cos, tan, asin, acos, atan, log, ln, abs, ceil, floor, round, pow, min, max"
    )]
    #[serde(default, alias = "expression", skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,

    /// Structured alternative to `expr`.
    #[schemars(description = "Operation to apply to a and b (instead of expr)")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,

    /// Left operand for `operation`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<f64>,

    /// Right operand for `operation`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<f64>,
}

/// `expression` is accepted as an alias of `expr`.
fn advertise_expression_alias(schema: &mut Schema) {
    if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        if let Some(expr) = properties.get("expr").cloned() {
            properties.insert("expression".to_string(), expr);
        }
    }
}

/// Structured output of the calculator.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CalculatorOutput {
    /// The evaluated expression, normalized.
    pub expression: String,

    /// Numeric result; integral values are reported as integers.
    #[schemars(with = "f64")]
    pub result: Value,
}

// ============================================================================
// Tool Definition
// ============================================================================

/// Calculator tool - pure arithmetic.
pub struct CalculatorTool {
    descriptor: ToolDescriptor,
}

impl CalculatorTool {
    /// Tool name as registered in MCP.
    pub const NAME: &'static str = "calculator";

    /// Tool description shown to clients.
    pub const DESCRIPTION: &'static str = "Evaluate mathematical expressions using natural syntax (e.g. '2 + 3 * 4', 'sin(pi/4)', 'sqrt(16)'), or apply a single operation to two operands. Division by zero and overflow are reported as errors.";

    pub fn new() -> Self {
        Self {
            descriptor: describe::<CalculatorParams, CalculatorOutput>(Self::NAME, Self::DESCRIPTION),
        }
    }

    /// Compute the result for validated parameters.
    pub fn compute(params: &CalculatorParams) -> Result<CalculatorOutput, ExecutionError> {
        let (expression, value) = match (&params.expr, params.operation) {
            (Some(expr), _) => {
                let tree = expression::parse(expr).map_err(|e| {
                    ExecutionError::internal(format!("validated expression failed to parse: {}", e))
                })?;
                (expr.clone(), tree.evaluate().map_err(invalid_operation)?)
            }
            (None, Some(operation)) => {
                let (a, b) = (params.a.unwrap_or_default(), params.b.unwrap_or_default());
                let op = BinaryOp::from(operation);
                let value = op.apply(a, b).map_err(invalid_operation)?;
                (format!("{} {} {}", a, op.symbol(), b), value)
            }
            (None, None) => {
                return Err(ExecutionError::internal("no expression or operation supplied"));
            }
        };

        Ok(CalculatorOutput {
            result: number_value(value).map_err(invalid_operation)?,
            expression,
        })
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn validate(&self, arguments: Arguments) -> Result<Arguments, ValidationError> {
        let mut params: CalculatorParams = parse_arguments(&arguments)?;

        if params.expr.is_some() && params.operation.is_some() {
            return Err(ValidationError::new(
                "provide either 'expr' or 'operation', not both",
            ));
        }

        if let Some(raw) = params.expr.take() {
            let expr = raw.trim();
            if expr.is_empty() {
                return Err(ValidationError::field("expr", "expression must not be empty"));
            }
            if expr.len() > MAX_EXPRESSION_LEN {
                return Err(ValidationError::field(
                    "expr",
                    format!("expression longer than {} characters", MAX_EXPRESSION_LEN),
                ));
            }
            expression::parse(expr).map_err(|e| {
                ValidationError::field("expr", format!("Expression syntax error: {}", e))
            })?;
            params.expr = Some(expr.to_string());
        } else if params.operation.is_some() {
            for (name, value) in [("a", params.a), ("b", params.b)] {
                match value {
                    None => {
                        return Err(ValidationError::field(
                            name,
                            format!("operation requires operand '{}'", name),
                        ));
                    }
                    Some(v) if !v.is_finite() => {
                        return Err(ValidationError::field(
                            name,
                            format!("operand '{}' must be finite", name),
                        ));
                    }
                    Some(_) => {}
                }
            }
        } else {
            return Err(ValidationError::field(
                "expr",
                "missing required argument 'expr' (or 'operation' with 'a' and 'b')",
            ));
        }

        to_arguments(&params)
    }

    #[instrument(skip_all, fields(tool = "calculator"))]
    async fn execute(
        &self,
        arguments: Arguments,
        _context: &InvocationContext,
        _cancel: CancellationSignal,
    ) -> Result<ToolOutput, ExecutionError> {
        let params: CalculatorParams = decode_validated(arguments)?;
        let output = Self::compute(&params)?;
        debug!("{} = {}", output.expression, output.result);
        let summary = format!("{}", output.result);
        ToolOutput::new(summary, &output)
    }
}

fn invalid_operation(err: EvalError) -> ExecutionError {
    ExecutionError::invalid_operation(err.to_string())
}

/// Render a finite result, using an integer when it is exact.
fn number_value(value: f64) -> Result<Value, EvalError> {
    if value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        return Ok(Value::from(value as i64));
    }
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or(EvalError::Overflow)
}

// ============================================================================
// Tests
// ============================================================================
