//! A deliberately small `when` expression language (§4.1 step 1): function
//! calls into condition functions, equality/inequality comparisons against
//! `variables.*`/`session.*`/event fields, and bare truthy lookups.
//!
//! This is not a general expression grammar — workflows that need more than
//! this should compose via `run_pipeline`/`call_mcp_tool` instead.

use crate::workflow::condition::ConditionProvider;
use std::collections::HashMap;

pub struct EvalContext<'a> {
    pub event_type: &'a str,
    pub tool_name: Option<&'a str>,
    pub workflow_variables: &'a HashMap<String, serde_json::Value>,
    pub session_variables: &'a HashMap<String, serde_json::Value>,
    pub conditions: &'a dyn ConditionProvider,
}

/// Evaluates a `when` expression; `None` always matches.
pub fn eval(when: Option<&str>, ctx: &EvalContext) -> bool {
    let Some(expr) = when else { return true };
    let expr = expr.trim();
    if expr.is_empty() || expr == "true" {
        return true;
    }
    if expr == "false" {
        return false;
    }
    if let Some((fn_name, arg)) = parse_call(expr) {
        return eval_call(&fn_name, arg.as_deref(), ctx);
    }
    for op in ["==", "!="] {
        if let Some(idx) = expr.find(op) {
            let lhs = expr[..idx].trim();
            let rhs = strip_quotes(expr[idx + op.len()..].trim());
            let lhs_val = resolve(lhs, ctx);
            let matches = lhs_val.as_deref() == Some(rhs.as_str());
            return if op == "==" { matches } else { !matches };
        }
    }
    resolve(expr, ctx).map(|v| v == "true").unwrap_or(false)
}

fn parse_call(expr: &str) -> Option<(String, Option<String>)> {
    let open = expr.find('(')?;
    if !expr.ends_with(')') {
        return None;
    }
    let name = expr[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let inner = expr[open + 1..expr.len() - 1].trim();
    let arg = if inner.is_empty() { None } else { Some(strip_quotes(inner)) };
    Some((name.to_string(), arg))
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
        || (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn eval_call(name: &str, arg: Option<&str>, ctx: &EvalContext) -> bool {
    match name {
        "user_says" => ctx.conditions.user_says(arg.unwrap_or_default()),
        "is_test_file" => ctx.conditions.is_test_file(arg.unwrap_or_default()),
        "task_tree_complete" => match arg.and_then(|a| a.parse().ok()) {
            Some(id) => ctx.conditions.task_tree_complete(id),
            None => false,
        },
        _ => false,
    }
}

fn resolve(ident: &str, ctx: &EvalContext) -> Option<String> {
    if ident == "event" || ident == "event_type" {
        return Some(ctx.event_type.to_string());
    }
    if ident == "tool_name" {
        return ctx.tool_name.map(|s| s.to_string());
    }
    if let Some(key) = ident.strip_prefix("variables.") {
        return ctx.workflow_variables.get(key).map(value_to_string);
    }
    if let Some(key) = ident.strip_prefix("session.") {
        return ctx.session_variables.get(key).map(value_to_string);
    }
    None
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::condition::StaticConditionProvider;

    fn ctx<'a>(
        wf_vars: &'a HashMap<String, serde_json::Value>,
        sess_vars: &'a HashMap<String, serde_json::Value>,
        conditions: &'a StaticConditionProvider,
    ) -> EvalContext<'a> {
        EvalContext {
            event_type: "before_tool",
            tool_name: Some("Bash"),
            workflow_variables: wf_vars,
            session_variables: sess_vars,
            conditions,
        }
    }

    #[test]
    fn none_always_matches() {
        let wf = HashMap::new();
        let sess = HashMap::new();
        let cond = StaticConditionProvider { task_tree_complete: false, user_says: false, is_test_file: false };
        assert!(eval(None, &ctx(&wf, &sess, &cond)));
    }

    #[test]
    fn equality_against_tool_name() {
        let wf = HashMap::new();
        let sess = HashMap::new();
        let cond = StaticConditionProvider { task_tree_complete: false, user_says: false, is_test_file: false };
        assert!(eval(Some("tool_name == 'Bash'"), &ctx(&wf, &sess, &cond)));
        assert!(!eval(Some("tool_name == 'Read'"), &ctx(&wf, &sess, &cond)));
    }

    #[test]
    fn function_call_dispatches_to_condition_provider() {
        let wf = HashMap::new();
        let sess = HashMap::new();
        let cond = StaticConditionProvider { task_tree_complete: false, user_says: true, is_test_file: false };
        assert!(eval(Some("user_says('done')"), &ctx(&wf, &sess, &cond)));
    }

    #[test]
    fn variable_equality() {
        let mut wf = HashMap::new();
        wf.insert("counter".to_string(), serde_json::json!(5));
        let sess = HashMap::new();
        let cond = StaticConditionProvider { task_tree_complete: false, user_says: false, is_test_file: false };
        assert!(eval(Some("variables.counter == 5"), &ctx(&wf, &sess, &cond)));
    }
}
