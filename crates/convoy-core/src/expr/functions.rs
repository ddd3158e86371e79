//! Function library for `$name(args...)` calls
//!
//! Functions receive already-evaluated arguments. Extra functions can be
//! registered on a [`FunctionRegistry`] before it is handed to an
//! [`Evaluator`](super::Evaluator).

use std::collections::HashMap;

use convoy_model::{DeploymentSpec, Value};

use super::ExprError;

/// Variables visible to an expression
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// Target or component properties, read by `$property()`
    pub properties: HashMap<String, String>,
    /// Read by `$input()`
    pub inputs: HashMap<String, Value>,
    /// The value under test, read by `$val()`
    pub value: Value,
    /// Instance name, falls back to the deployment's instance
    pub instance: String,
    /// Component whose parameters `$param()` reads
    pub component: String,
    pub deployment: Option<DeploymentSpec>,
}

impl EvalContext {
    #[must_use]
    pub fn with_properties(properties: HashMap<String, String>) -> Self {
        Self {
            properties,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    #[must_use]
    pub fn with_deployment(mut self, deployment: DeploymentSpec) -> Self {
        self.deployment = Some(deployment);
        self
    }

    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }
}

pub type ExprFunction = fn(&[Value], &EvalContext) -> Result<Value, ExprError>;

/// Name to function dispatch table
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, ExprFunction>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionRegistry {
    /// Registry without any functions
    #[must_use]
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry with the standard library
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("params", params);
        registry.register("param", param);
        registry.register("property", property);
        registry.register("input", input);
        registry.register("val", val);
        registry.register("context", val);
        registry.register("instance", instance);
        registry.register("equal", equal);
        registry.register("and", and);
        registry.register("or", or);
        registry.register("not", not);
        registry.register("gt", gt);
        registry.register("ge", ge);
        registry.register("lt", lt);
        registry.register("le", le);
        registry.register("between", between);
        registry.register("if", if_);
        registry.register("in", in_);
        registry.register("json", json);
        registry
    }

    /// Add or replace a function
    pub fn register(&mut self, name: impl Into<String>, function: ExprFunction) {
        self.functions.insert(name.into(), function);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn call(&self, name: &str, args: &[Value], ctx: &EvalContext) -> Result<Value, ExprError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| ExprError::UnknownFunction(name.to_string()))?;
        function(args, ctx)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn arity(function: &str, args: &[Value], expected: usize) -> Result<(), ExprError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ExprError::Arity {
            function: function.to_string(),
            expected: expected.to_string(),
            found: args.len(),
        })
    }
}

fn failed(function: &str, message: impl Into<String>) -> ExprError {
    ExprError::Function {
        function: function.to_string(),
        message: message.into(),
    }
}

fn to_bool(function: &str, value: &Value) -> Result<bool, ExprError> {
    value
        .as_bool()
        .ok_or_else(|| failed(function, format!("'{value}' is not a boolean value")))
}

fn to_number(function: &str, value: &Value) -> Result<f64, ExprError> {
    value
        .as_number()
        .ok_or_else(|| failed(function, format!("'{value}' is not a valid number")))
}

fn compare(
    function: &str,
    args: &[Value],
    op: fn(f64, f64) -> bool,
) -> Result<Value, ExprError> {
    arity(function, args, 2)?;
    let a = to_number(function, &args[0])?;
    let b = to_number(function, &args[1])?;
    Ok(Value::Bool(op(a, b)))
}

// ============================================================================
// Lookups
// ============================================================================

fn params(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("params", args, 1)?;
    Ok(args[0].clone())
}

fn param(args: &[Value], ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("param", args, 1)?;
    if ctx.component.is_empty() {
        return Err(failed("param", "a component name is needed"));
    }
    let deployment = ctx
        .deployment
        .as_ref()
        .ok_or_else(|| failed("param", "deployment spec is not found"))?;
    let key = args[0].to_string();
    deployment
        .parameter(&ctx.component, &key)
        .map(Value::String)
        .ok_or_else(|| {
            failed(
                "param",
                format!("parameter {key} is not found on component {}", ctx.component),
            )
        })
}

fn property(args: &[Value], ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("property", args, 1)?;
    let key = args[0].to_string();
    ctx.properties
        .get(&key)
        .map(|v| Value::String(v.clone()))
        .ok_or_else(|| failed("property", format!("property {key} is not found")))
}

fn input(args: &[Value], ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("input", args, 1)?;
    let key = args[0].to_string();
    ctx.inputs
        .get(&key)
        .cloned()
        .ok_or_else(|| failed("input", format!("input {key} is not found")))
}

fn val(args: &[Value], ctx: &EvalContext) -> Result<Value, ExprError> {
    match args {
        [] => Ok(ctx.value.clone()),
        [key] => {
            let Value::Map(map) = &ctx.value else {
                return Err(failed("val", format!("context value '{}' is not a map", ctx.value)));
            };
            let key = key.to_string();
            map.get(&key)
                .cloned()
                .ok_or_else(|| failed("val", format!("key {key} is not found in context value")))
        }
        _ => Err(ExprError::Arity {
            function: "val".to_string(),
            expected: "0 or 1".to_string(),
            found: args.len(),
        }),
    }
}

fn instance(args: &[Value], ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("instance", args, 0)?;
    if !ctx.instance.is_empty() {
        return Ok(Value::String(ctx.instance.clone()));
    }
    ctx.deployment
        .as_ref()
        .map(|d| Value::String(d.instance_name().to_string()))
        .ok_or_else(|| failed("instance", "deployment spec is not found"))
}

// ============================================================================
// Logic and comparison
// ============================================================================

fn equal(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("equal", args, 2)?;
    Ok(Value::Bool(args[0].to_string() == args[1].to_string()))
}

fn and(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("and", args, 2)?;
    Ok(Value::Bool(to_bool("and", &args[0])? && to_bool("and", &args[1])?))
}

fn or(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("or", args, 2)?;
    let a = to_bool("or", &args[0])?;
    let b = to_bool("or", &args[1])?;
    Ok(Value::Bool(a || b))
}

fn not(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("not", args, 1)?;
    Ok(Value::Bool(!to_bool("not", &args[0])?))
}

fn gt(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    compare("gt", args, |a, b| a > b)
}

fn ge(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    compare("ge", args, |a, b| a >= b)
}

fn lt(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    compare("lt", args, |a, b| a < b)
}

fn le(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    compare("le", args, |a, b| a <= b)
}

fn between(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("between", args, 3)?;
    let v = to_number("between", &args[0])?;
    let lo = to_number("between", &args[1])?;
    let hi = to_number("between", &args[2])?;
    Ok(Value::Bool(v >= lo && v <= hi))
}

fn if_(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("if", args, 3)?;
    Ok(if args[0].to_string() == "true" {
        args[1].clone()
    } else {
        args[2].clone()
    })
}

fn in_(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    let [needle, haystack @ ..] = args else {
        return Err(ExprError::Arity {
            function: "in".to_string(),
            expected: "at least 2".to_string(),
            found: 0,
        });
    };
    if haystack.is_empty() {
        return Err(ExprError::Arity {
            function: "in".to_string(),
            expected: "at least 2".to_string(),
            found: 1,
        });
    }
    let needle = needle.to_string();
    Ok(Value::Bool(haystack.iter().any(|v| v.to_string() == needle)))
}

fn json(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
    arity("json", args, 1)?;
    serde_json::to_string(&args[0])
        .map(Value::String)
        .map_err(|e| failed("json", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value, ExprError> {
        FunctionRegistry::builtin().call(name, args, &EvalContext::default())
    }

    fn s(v: &str) -> Value {
        Value::from(v)
    }

    #[test]
    fn test_comparisons_coerce_numeric_strings() {
        assert_eq!(call("gt", &[s("10"), Value::Number(9.0)]).unwrap(), Value::Bool(true));
        assert_eq!(call("le", &[s("3"), s("3")]).unwrap(), Value::Bool(true));
        assert_eq!(
            call("between", &[Value::Number(5.0), s("1"), s("5")]).unwrap(),
            Value::Bool(true)
        );
        assert!(matches!(
            call("lt", &[s("abc"), s("1")]),
            Err(ExprError::Function { .. })
        ));
    }

    #[test]
    fn test_logic() {
        assert_eq!(call("and", &[s("true"), Value::Bool(true)]).unwrap(), Value::Bool(true));
        assert_eq!(call("or", &[s("false"), s("FALSE")]).unwrap(), Value::Bool(false));
        assert_eq!(call("not", &[s("false")]).unwrap(), Value::Bool(true));
        assert!(call("and", &[s("yes"), s("true")]).is_err());
        assert_eq!(call("if", &[Value::Bool(true), s("a"), s("b")]).unwrap(), s("a"));
        assert_eq!(call("if", &[s("nope"), s("a"), s("b")]).unwrap(), s("b"));
    }

    #[test]
    fn test_equal_and_in_compare_text() {
        assert_eq!(call("equal", &[Value::Number(2.0), s("2")]).unwrap(), Value::Bool(true));
        assert_eq!(call("in", &[s("b"), s("a"), s("b")]).unwrap(), Value::Bool(true));
        assert_eq!(call("in", &[s("z"), s("a"), s("b")]).unwrap(), Value::Bool(false));
        assert!(matches!(call("in", &[s("z")]), Err(ExprError::Arity { found: 1, .. })));
    }

    #[test]
    fn test_arity_message() {
        let err = call("gt", &[s("1")]).unwrap_err();
        assert_eq!(err.to_string(), "$gt() expects 2 arguments, found 1");
    }

    #[test]
    fn test_lookups() {
        let mut ctx = EvalContext::with_properties(HashMap::from([("os".to_string(), "linux".to_string())]))
            .with_value(Value::Map([("port".to_string(), Value::Number(80.0))].into()));
        ctx.inputs.insert("replicas".to_string(), Value::Number(3.0));
        let registry = FunctionRegistry::builtin();

        assert_eq!(registry.call("property", &[s("os")], &ctx).unwrap(), s("linux"));
        assert!(registry.call("property", &[s("arch")], &ctx).is_err());
        assert_eq!(registry.call("input", &[s("replicas")], &ctx).unwrap(), Value::Number(3.0));
        assert_eq!(registry.call("val", &[s("port")], &ctx).unwrap(), Value::Number(80.0));
        assert_eq!(registry.call("params", &[s("x")], &ctx).unwrap(), s("x"));
        assert!(registry.call("instance", &[], &ctx).is_err());
    }

    #[test]
    fn test_param_reads_deployment() {
        let mut deployment = DeploymentSpec::default();
        deployment.instance.name = "inst".to_string();
        deployment.instance.parameters.insert("tag".to_string(), "v2".to_string());
        let ctx = EvalContext::default()
            .with_deployment(deployment)
            .with_component("web");
        let registry = FunctionRegistry::builtin();
        assert_eq!(registry.call("param", &[s("tag")], &ctx).unwrap(), s("v2"));
        assert!(registry.call("param", &[s("missing")], &ctx).is_err());
        assert_eq!(registry.call("instance", &[], &ctx).unwrap(), s("inst"));
    }

    #[test]
    fn test_json_and_unknown() {
        assert_eq!(call("json", &[s("a")]).unwrap(), s("\"a\""));
        assert!(matches!(call("nope", &[]), Err(ExprError::UnknownFunction(_))));
    }

    #[test]
    fn test_custom_function() {
        fn upper(args: &[Value], _ctx: &EvalContext) -> Result<Value, ExprError> {
            Ok(Value::String(args[0].to_string().to_uppercase()))
        }
        let mut registry = FunctionRegistry::empty();
        assert!(!registry.contains("upper"));
        registry.register("upper", upper);
        assert_eq!(
            registry.call("upper", &[s("abc")], &EvalContext::default()).unwrap(),
            s("ABC")
        );
    }
}
