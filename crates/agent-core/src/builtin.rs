//! Built-in Tools
//!
//! Small, dependency-free tools every registry created with
//! [`ToolRegistry::new`](crate::tool::ToolRegistry::new) starts with.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{AgentError, Result};
use crate::tool::{ParameterSchema, Tool, ToolDefinition, parse_arguments};

/// The tools loaded into a registry on first use
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(DateTimeTool), Arc::new(CalculatorTool), Arc::new(EchoTool)]
}

/// DateTime tool - returns current time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("datetime", "Get the current date and time").param(
            ParameterSchema::string("format", "Output format: 'iso', 'human', or 'unix'")
                .with_default(json!("human"))
                .with_enum([json!("iso"), json!("human"), json!("unix")]),
        )
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args = parse_arguments(arguments)?;
        let format = args.get("format").and_then(|v| v.as_str()).unwrap_or("human");

        let now = chrono::Utc::now();

        Ok(match format {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        })
    }
}

/// Longest expression the calculator accepts. The evaluator recurses once per
/// operator, so input length bounds stack depth.
const MAX_EXPRESSION_LEN: usize = 256;

/// Calculator tool - evaluates mathematical expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("calculate", "Evaluate a mathematical expression").param(
            ParameterSchema::string(
                "expression",
                "Mathematical expression to evaluate (e.g., '2 + 2', '10 * 5')",
            )
            .required(),
        )
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args = parse_arguments(arguments)?;
        self.definition().check_required(&args)?;

        let expr = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ToolValidation("expression must be a string".into()))?;
        if expr.len() > MAX_EXPRESSION_LEN {
            return Err(AgentError::ToolValidation(format!(
                "expression is longer than {MAX_EXPRESSION_LEN} characters"
            )));
        }

        let result = evaluate_expression(expr).map_err(AgentError::ToolExecution)?;
        Ok(format!("{expr} = {result}"))
    }
}

/// Echo tool - returns its `text` argument unchanged
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("echo", "Return the given text unchanged")
            .param(ParameterSchema::string("text", "Text to echo back").required())
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args = parse_arguments(arguments)?;
        self.definition().check_required(&args)?;

        match &args["text"] {
            serde_json::Value::String(text) => Ok(text.clone()),
            other => Ok(other.to_string()),
        }
    }
}

/// Simple expression evaluator supporting + - * / ^ and parentheses
fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    let expr = expr.replace(' ', "");
    if expr.is_empty() {
        return Err("Empty expression".into());
    }

    // Handle parentheses innermost first
    if let Some(start) = expr.rfind('(') {
        let Some(end) = expr[start..].find(')') else {
            return Err("Unbalanced parentheses".into());
        };
        let inner = evaluate_expression(&expr[start + 1..start + end])?;
        let new_expr = format!("{}{}{}", &expr[..start], inner, &expr[start + end + 1..]);
        return evaluate_expression(&new_expr);
    }
    if expr.contains(')') {
        return Err("Unbalanced parentheses".into());
    }

    let bytes = expr.as_bytes();

    // Addition/subtraction (lowest precedence, evaluated last)
    for (i, c) in expr.char_indices().rev() {
        if i > 0 && (c == '+' || c == '-') {
            // Skip unary minus and exponent signs
            let prev = bytes[i - 1];
            if prev.is_ascii_digit() || prev == b'.' {
                let left = evaluate_expression(&expr[..i])?;
                let right = evaluate_expression(&expr[i + 1..])?;
                return Ok(if c == '+' { left + right } else { left - right });
            }
        }
    }

    // Multiplication/division
    for (i, c) in expr.char_indices().rev() {
        if c == '*' || c == '/' {
            let left = evaluate_expression(&expr[..i])?;
            let right = evaluate_expression(&expr[i + 1..])?;
            if c == '/' && right == 0.0 {
                return Err("Division by zero".into());
            }
            return Ok(if c == '*' { left * right } else { left / right });
        }
    }

    // Power
    if let Some(i) = expr.find('^') {
        let left = evaluate_expression(&expr[..i])?;
        let right = evaluate_expression(&expr[i + 1..])?;
        return Ok(left.powf(right));
    }

    expr.parse::<f64>().map_err(|e| format!("Parse error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculator() {
        assert!((evaluate_expression("2 + 2").unwrap() - 4.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("10 * 5").unwrap() - 50.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("(2 + 3) * 4").unwrap() - 20.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("2 ^ 8").unwrap() - 256.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("-3 + 5").unwrap() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_calculator_errors() {
        assert_eq!(evaluate_expression("1 / 0").unwrap_err(), "Division by zero");
        assert!(evaluate_expression("(1 + 2").is_err());
        assert!(evaluate_expression("").is_err());
    }

    #[tokio::test]
    async fn test_echo_returns_text() {
        assert_eq!(EchoTool.execute(r#"{"text":"x"}"#).await.unwrap(), "x");
        assert!(EchoTool.execute("{}").await.is_err());
    }

    #[tokio::test]
    async fn test_calculate_tool_output() {
        let output = CalculatorTool
            .execute(r#"{"expression":"6 * 7"}"#)
            .await
            .unwrap();
        assert_eq!(output, "6 * 7 = 42");
    }

    #[tokio::test]
    async fn test_calculate_rejects_oversized_expression() {
        let expression = vec!["1"; 50_000].join("+");
        let arguments = json!({ "expression": expression }).to_string();

        let err = CalculatorTool.execute(&arguments).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolValidation(_)));

        // Through the registry the failure is contained as text
        let registry = crate::tool::ToolRegistry::new();
        let output = registry.execute_tool("calculate", &arguments).await;
        assert!(output.starts_with("Tool execution error:"));
        assert!(output.contains("longer than 256"));
    }

    #[tokio::test]
    async fn test_calculate_accepts_expression_at_limit() {
        let expression = vec!["1"; 128].join("+");
        assert!(expression.len() <= MAX_EXPRESSION_LEN);
        let arguments = json!({ "expression": expression }).to_string();
        let output = CalculatorTool.execute(&arguments).await.unwrap();
        assert!(output.ends_with("= 128"));
    }

    #[tokio::test]
    async fn test_datetime_unix() {
        let output = DateTimeTool.execute(r#"{"format":"unix"}"#).await.unwrap();
        assert!(output.parse::<i64>().is_ok());
    }
}
