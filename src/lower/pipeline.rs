//! The ordered pass pipeline. Stage order is a contract: generics must be
//! erased before traits, traits before method calls, storage
//! materialization and conversion exposure before escape analysis, and so
//! on. Each stage's output is well-typed input for the next.

use std::rc::Rc;

use log::debug;

use crate::{
    ast::{self, Statement},
    diagnostics::{CompileError, CompileResult},
    lower::{
        comptime::EraseCompileTimeExpressions,
        const_erasure::EraseConstants,
        control_flow::LowerControlFlow,
        conversions::ExposeImplicitConversions,
        escape::analyze_escapes,
        flatten::FlattenSeqs,
        for_in::DesugarForIn,
        generics::Monomorphize,
        impl_blocks::EraseImplBlocks,
        imports::{ModuleParser, ModuleSourceResolver, NullModuleParser, ResolveImports},
        matches::LowerMatches,
        methods::EraseMethodCalls,
        returns::SynthesizeTerminalReturns,
        test_decls::HoistTests,
        traits::SynthesizeVtables,
        unions::EraseUnions,
        Rewriter,
    },
    sema::{Env, layout::MemoryLayoutStrategy},
};

/// The lowered core-language output of a compilation run
#[derive(Debug)]
pub struct LoweredModule {
    pub block: ast::Block,
    /// Names of discovered test declarations, in declaration order
    pub test_names: Vec<String>,
}

pub struct Pipeline {
    env: Env,
    parser: Box<dyn ModuleParser>,
    resolver: ModuleSourceResolver,
}

impl Pipeline {
    pub fn new(layout: Rc<dyn MemoryLayoutStrategy>) -> Self {
        Self::with_modules(layout, Box::new(NullModuleParser), ModuleSourceResolver::new())
    }

    /// A pipeline that can resolve `import` statements through the given
    /// parser service and source resolver
    pub fn with_modules(
        layout: Rc<dyn MemoryLayoutStrategy>,
        parser: Box<dyn ModuleParser>,
        resolver: ModuleSourceResolver,
    ) -> Self {
        Self {
            env: Env::new(layout),
            parser,
            resolver,
        }
    }

    pub fn env(&mut self) -> &mut Env {
        &mut self.env
    }

    /// Resets the environment for an independent recompilation
    pub fn clear_symbols(&mut self) {
        self.env.clear_symbols();
    }

    /// Runs every lowering pass in order. Running on no input is a no-op;
    /// the first error aborts the run.
    pub fn run(&mut self, root: Option<&Statement>) -> CompileResult<Option<LoweredModule>> {
        let mut current = root.cloned();
        let mut test_names = Vec::new();

        macro_rules! stage {
            ($name:literal, $pass:expr) => {{
                debug!(concat!("running pass: ", $name));
                self.env.begin_pass();
                let mut pass = $pass;
                current = pass.run(current.as_ref())?;
            }};
        }

        stage!("resolve imports", {
            ResolveImports::new(&mut self.env, self.parser.as_ref(), &self.resolver)
        });

        {
            debug!("running pass: hoist tests");
            self.env.begin_pass();
            let mut pass = HoistTests::new(&mut self.env);
            current = pass.run(current.as_ref())?;
            test_names = pass.test_names;
        }

        stage!("desugar for-in", DesugarForIn::new(&mut self.env));
        stage!("monomorphize generics", Monomorphize::new(&mut self.env));
        stage!("synthesize vtables", SynthesizeVtables::new(&mut self.env));
        stage!("erase method calls", EraseMethodCalls::new(&mut self.env));
        stage!(
            "synthesize terminal returns",
            SynthesizeTerminalReturns::new(&mut self.env)
        );
        stage!("erase impl blocks", EraseImplBlocks::new(&mut self.env));
        stage!(
            "erase compile time expressions",
            EraseCompileTimeExpressions::new(&mut self.env)
        );
        stage!("erase constants", EraseConstants::new(&mut self.env));
        stage!("lower matches", LowerMatches::new(&mut self.env));
        stage!(
            "expose implicit conversions",
            ExposeImplicitConversions::new(&mut self.env)
        );
        stage!("erase unions", EraseUnions::new(&mut self.env));

        {
            debug!("running pass: escape analysis");
            self.env.begin_pass();
            current = analyze_escapes(&mut self.env, current.as_ref())?;
        }

        stage!("lower control flow", LowerControlFlow::new(&mut self.env));
        stage!("flatten sequences", FlattenSeqs::new(&mut self.env));

        match current {
            None => Ok(None),
            Some(Statement::Block(block)) => Ok(Some(LoweredModule { block, test_names })),
            Some(other) => Err(CompileError::internal(format!(
                "expected Block at root after lowering, found {other:?}"
            ))),
        }
    }
}
