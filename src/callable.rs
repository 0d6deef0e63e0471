use rhai::{Dynamic, Engine, FnPtr, Map, AST, INT};

use crate::environment::EventSource;
use crate::error::{ScriptError, ScriptResult};

/// How many values a callable accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// A script function with this many declared (uncurried) parameters. The trailing one is the
    /// context slot; the rest are filled from the decoded payload.
    Declared(usize),
    /// Not defined in the script library; receives every decoded argument and no context slot.
    Native,
}

/// A script function captured for later invocation by the host.
#[derive(Debug, Clone)]
pub struct ScriptCallable {
    fn_ptr: FnPtr,
    arity: Arity,
}

impl ScriptCallable {
    /// Resolves the arity of `fn_ptr` against the functions compiled into `lib`.
    ///
    /// Overloads are picked by the largest parameter count.
    pub fn resolve(fn_ptr: FnPtr, lib: &AST) -> Self {
        let curried = fn_ptr.curry().len();
        let arity = lib
            .iter_functions()
            .filter(|meta| meta.name == fn_ptr.fn_name() && meta.params.len() >= curried)
            .map(|meta| meta.params.len() - curried)
            .max()
            .map_or(Arity::Native, Arity::Declared);
        Self { fn_ptr, arity }
    }

    pub fn with_arity(fn_ptr: FnPtr, arity: Arity) -> Self {
        Self { fn_ptr, arity }
    }

    pub fn name(&self) -> &str {
        self.fn_ptr.fn_name()
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Builds the argument list: the leading declared parameters come from `args` (padded with
    /// `()` or truncated), followed by the context value in the trailing slot.
    pub fn arguments(&self, args: &[Dynamic], context: &CallContext) -> Vec<Dynamic> {
        match self.arity {
            Arity::Native => args.to_vec(),
            Arity::Declared(0) => Vec::new(),
            Arity::Declared(count) => {
                let leading = count - 1;
                let mut call_args: Vec<Dynamic> = args.iter().take(leading).cloned().collect();
                call_args.resize(leading, Dynamic::UNIT);
                call_args.push(context.to_dynamic());
                call_args
            }
        }
    }

    pub fn invoke(
        &self,
        engine: &Engine,
        lib: &AST,
        args: &[Dynamic],
        context: &CallContext,
    ) -> ScriptResult<Dynamic> {
        let call_args = self.arguments(args, context);
        self.fn_ptr
            .call::<Dynamic>(engine, lib, call_args)
            .map_err(|err| ScriptError::runtime(self.fn_ptr.fn_name(), err))
    }
}

/// Value passed in a callable's trailing parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub instance: u32,
    pub source: Option<EventSource>,
}

impl CallContext {
    pub fn to_dynamic(&self) -> Dynamic {
        let mut map = Map::new();
        map.insert("instance".into(), Dynamic::from(self.instance as INT));
        let source = self.source.map(|source| Dynamic::from(source as INT)).unwrap_or(Dynamic::UNIT);
        map.insert("source".into(), source);
        Dynamic::from_map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(source: &str) -> AST {
        Engine::new_raw().compile(source).expect("library compiles")
    }

    fn ints(values: &[Dynamic]) -> Vec<Option<INT>> {
        values.iter().map(|value| value.as_int().ok()).collect()
    }

    #[test]
    fn declared_parameters_are_filled_then_context_appended() {
        let lib = lib("fn pair(a, b, ctx) { a + b }");
        let callable = ScriptCallable::resolve(FnPtr::new("pair").unwrap(), &lib);
        assert_eq!(callable.arity(), Arity::Declared(3));

        let context = CallContext { instance: 9, source: Some(4) };
        let args = [Dynamic::from(1 as INT), Dynamic::from(2 as INT), Dynamic::from(3 as INT)];
        let call_args = callable.arguments(&args, &context);
        assert_eq!(call_args.len(), 3);
        assert_eq!(ints(&call_args[..2]), vec![Some(1), Some(2)]);
        assert!(call_args[2].is_map());

        let short = callable.arguments(&args[..1], &context);
        assert_eq!(short.len(), 3);
        assert!(short[1].is_unit());
    }

    #[test]
    fn zero_parameter_functions_get_nothing() {
        let lib = lib("fn tick() { 1 }");
        let callable = ScriptCallable::resolve(FnPtr::new("tick").unwrap(), &lib);
        assert_eq!(callable.arity(), Arity::Declared(0));
        let context = CallContext { instance: 1, source: None };
        assert!(callable.arguments(&[Dynamic::from(5 as INT)], &context).is_empty());
    }

    #[test]
    fn unknown_functions_receive_every_argument() {
        let callable = ScriptCallable::resolve(FnPtr::new("native_fn").unwrap(), &AST::empty());
        assert_eq!(callable.arity(), Arity::Native);
        let context = CallContext { instance: 1, source: None };
        let args = [Dynamic::from(1 as INT), Dynamic::from(2 as INT)];
        assert_eq!(callable.arguments(&args, &context).len(), 2);
    }

    #[test]
    fn overloads_resolve_to_the_widest() {
        let lib = lib("fn h(ctx) { 1 } fn h(a, ctx) { 2 } fn h(a, b, ctx) { 3 }");
        let callable = ScriptCallable::resolve(FnPtr::new("h").unwrap(), &lib);
        assert_eq!(callable.arity(), Arity::Declared(3));

        let engine = Engine::new_raw();
        let context = CallContext { instance: 1, source: None };
        let result = callable.invoke(&engine, &lib, &[Dynamic::from(1 as INT)], &context).expect("call succeeds");
        assert_eq!(result.as_int().unwrap(), 3);
    }

    #[test]
    fn invoke_runs_against_the_library() {
        let engine = Engine::new_raw();
        let lib = engine.compile("fn pair(a, b, ctx) { a * b + ctx.instance }").unwrap();
        let callable = ScriptCallable::resolve(FnPtr::new("pair").unwrap(), &lib);
        let context = CallContext { instance: 100, source: None };
        let args = [Dynamic::from(6 as INT), Dynamic::from(7 as INT), Dynamic::from(8 as INT)];
        let result = callable.invoke(&engine, &lib, &args, &context).expect("call succeeds");
        assert_eq!(result.as_int().unwrap(), 142);
    }
}
