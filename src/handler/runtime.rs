//! Set-handler compilation and execution.
//!
//! Handler source lives in a vector's `template.set` and is written in
//! rhai, the engine's host scripting dialect. The runtime compiles
//! source to an AST (cached per vector, invalidated when the source
//! changes) and evaluates it against a scope assembled by the executor.
//! Handlers have full host authority; the engine does not sandbox them.

use miette::Diagnostic;
use rhai::{AST, Dynamic, Engine, ImmutableString, Scope};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use super::edges::{EdgesProxy, SchedulerProxy};

/// Hook receiving `print`/`debug` output from handler scripts.
pub type PrintHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Errors from handler compilation or execution.
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    #[error("handler failed to parse: {0}")]
    #[diagnostic(
        code(fluxgraph::handler::parse),
        help("The `template.set` source is not valid script.")
    )]
    Parse(#[from] rhai::ParseError),

    #[error("handler execution failed: {0}")]
    #[diagnostic(code(fluxgraph::handler::eval))]
    Eval(#[from] Box<rhai::EvalAltResult>),
}

struct CompiledHandler {
    source: String,
    ast: AST,
}

/// The embedded script engine plus its per-vector compile cache.
pub struct HandlerRuntime {
    engine: Engine,
    compiled: FxHashMap<String, CompiledHandler>,
}

impl HandlerRuntime {
    /// Build an engine with the proxy types registered and print/debug
    /// routed to `print_hook`.
    pub fn new(print_hook: PrintHook) -> Self {
        let mut engine = Engine::new();

        engine
            .register_type_with_name::<EdgesProxy>("Edges")
            .register_fn(
                "write",
                |edges: &mut EdgesProxy, field: ImmutableString, value: Dynamic| {
                    edges.write(field.as_str(), value);
                },
            )
            .register_indexer_set(
                |edges: &mut EdgesProxy, field: ImmutableString, value: Dynamic| {
                    edges.write(field.as_str(), value);
                },
            );

        engine
            .register_type_with_name::<SchedulerProxy>("Scheduler")
            .register_fn(
                "url",
                |scheduler: &mut SchedulerProxy, pattern: ImmutableString, value: Dynamic| {
                    scheduler.url(pattern.as_str(), value, "", None);
                },
            )
            .register_fn(
                "url",
                |scheduler: &mut SchedulerProxy,
                 pattern: ImmutableString,
                 value: Dynamic,
                 field: ImmutableString| {
                    scheduler.url(pattern.as_str(), value, field.as_str(), None);
                },
            )
            .register_fn(
                "url",
                |scheduler: &mut SchedulerProxy,
                 pattern: ImmutableString,
                 value: Dynamic,
                 field: ImmutableString,
                 scope_vector: ImmutableString| {
                    scheduler.url(
                        pattern.as_str(),
                        value,
                        field.as_str(),
                        Some(scope_vector.as_str()),
                    );
                },
            );

        let on_print = Arc::clone(&print_hook);
        engine.on_print(move |text| on_print(text));
        let on_debug = Arc::clone(&print_hook);
        engine.on_debug(move |text, _source, _pos| on_debug(text));

        Self {
            engine,
            compiled: FxHashMap::default(),
        }
    }

    /// Default print hook: handler output lands in tracing.
    pub fn tracing_print_hook() -> PrintHook {
        Arc::new(|text| tracing::info!(target: "fluxgraph::handler", "{text}"))
    }

    /// Compile `source` for `vector_id`, reusing the cached AST when the
    /// source is unchanged.
    pub fn compile(&mut self, vector_id: &str, source: &str) -> Result<AST, HandlerError> {
        if let Some(entry) = self.compiled.get(vector_id)
            && entry.source == source
        {
            return Ok(entry.ast.clone());
        }
        let ast = self.engine.compile(source)?;
        self.compiled.insert(
            vector_id.to_string(),
            CompiledHandler {
                source: source.to_string(),
                ast: ast.clone(),
            },
        );
        Ok(ast)
    }

    /// Evaluate a compiled handler against the assembled scope. The
    /// returned value is the script's final expression.
    pub fn eval(&self, scope: &mut Scope, ast: &AST) -> Result<Dynamic, HandlerError> {
        Ok(self.engine.eval_ast_with_scope::<Dynamic>(scope, ast)?)
    }

    /// True when an AST is cached for `vector_id`.
    pub fn is_cached(&self, vector_id: &str) -> bool {
        self.compiled.contains_key(vector_id)
    }
}

impl Default for HandlerRuntime {
    fn default() -> Self {
        Self::new(Self::tracing_print_hook())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn compile_cache_hits_until_source_changes() {
        let mut runtime = HandlerRuntime::default();
        runtime.compile("v1", "1 + 1").unwrap();
        assert!(runtime.is_cached("v1"));
        // Same source reuses; changed source recompiles without error.
        runtime.compile("v1", "1 + 1").unwrap();
        runtime.compile("v1", "2 + 2").unwrap();
    }

    #[test]
    fn parse_errors_surface() {
        let mut runtime = HandlerRuntime::default();
        let err = runtime.compile("v1", "let = ;").unwrap_err();
        assert!(matches!(err, HandlerError::Parse(_)));
    }

    #[test]
    fn edges_writes_reach_the_queue_from_script() {
        let mut runtime = HandlerRuntime::default();
        let edges = EdgesProxy::new();
        let mut scope = Scope::new();
        scope.push("edges", edges.clone());
        scope.push("value", 3_i64);

        let ast = runtime
            .compile("v1", r#"edges.write("out", value); edges["out"] = value * 2;"#)
            .unwrap();
        runtime.eval(&mut scope, &ast).unwrap();

        let writes = edges.take_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].value, json!(3));
        assert_eq!(writes[1].value, json!(6));
    }

    #[test]
    fn print_goes_to_the_hook() {
        let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let mut runtime = HandlerRuntime::new(Arc::new(move |text| {
            sink.lock().push(text.to_string());
        }));

        let mut scope = Scope::new();
        scope.push("value", ImmutableString::from("hello"));
        let ast = runtime.compile("v1", "print(value);").unwrap();
        runtime.eval(&mut scope, &ast).unwrap();

        assert_eq!(*captured.lock(), vec!["hello".to_string()]);
    }

    #[test]
    fn final_expression_is_the_return_value() {
        let mut runtime = HandlerRuntime::default();
        let mut scope = Scope::new();
        scope.push("value", 10.0_f64);
        let ast = runtime.compile("v1", "cos(value)").unwrap();
        let out = runtime.eval(&mut scope, &ast).unwrap();
        let out: f64 = out.as_float().unwrap();
        assert!((out - (-0.8390715290764524)).abs() < 1e-12);
    }
}
