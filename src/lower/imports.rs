//! Import resolution. An `import foo` statement is replaced by the lowered
//! contents of `foo.snap`: the module source is located (override map first,
//! then a file lookup guarded by the sandbox access hook), parsed through
//! the external parser service, recursively resolved, and spliced into the
//! importing tree. A process-wide "modules already seen" set guarantees each
//! module is parsed and lowered at most once even under repeated imports.

use std::path::PathBuf;

use hashbrown::HashMap;

use crate::{
    ast::{self, Statement},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    lower::Rewriter,
    sema::Env,
};

/// The external parser, treated as a callable service
pub trait ModuleParser {
    fn parse(&self, source: &str, origin: &str) -> CompileResult<Statement>;
}

/// A parser stand-in for pipelines that never import; any use is an error
pub struct NullModuleParser;

impl ModuleParser for NullModuleParser {
    fn parse(&self, _source: &str, origin: &str) -> CompileResult<Statement> {
        Err(CompileError::internal(format!(
            "no module parser was configured (while importing {origin})"
        )))
    }
}

/// External permission broker consulted before reading module files. The
/// core only asks; the policy lives elsewhere.
pub trait SandboxAccessManager {
    fn request_access(&self, path: &std::path::Path) -> bool;
}

pub struct AllowAllAccess;

impl SandboxAccessManager for AllowAllAccess {
    fn request_access(&self, _path: &std::path::Path) -> bool {
        true
    }
}

/// Locates module source text by name: the injected override map is
/// consulted first (used for embedding and unit testing without a real
/// filesystem), then `<name>.snap` relative to the importing file.
pub struct ModuleSourceResolver {
    overrides: HashMap<InternedSymbol, String>,
    search_root: Option<PathBuf>,
    access: Box<dyn SandboxAccessManager>,
}

impl Default for ModuleSourceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleSourceResolver {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            search_root: None,
            access: Box::new(AllowAllAccess),
        }
    }

    pub fn with_override(mut self, name: &str, source: impl Into<String>) -> Self {
        self.overrides.insert(InternedSymbol::new(name), source.into());
        self
    }

    pub fn with_search_root(mut self, root: PathBuf) -> Self {
        self.search_root = Some(root);
        self
    }

    pub fn with_access_manager(mut self, access: Box<dyn SandboxAccessManager>) -> Self {
        self.access = access;
        self
    }

    pub fn resolve(&self, name: InternedSymbol) -> CompileResult<String> {
        if let Some(source) = self.overrides.get(&name) {
            return Ok(source.clone());
        }

        if let Some(root) = &self.search_root {
            let path = root.join(format!("{name}.snap"));

            if !self.access.request_access(&path) {
                return Err(CompileError::new(CompileErrorKind::ModuleAccessDenied(
                    path.display().to_string(),
                )));
            }

            if path.is_file() {
                return std::fs::read_to_string(&path).map_err(|_| {
                    CompileError::new(CompileErrorKind::NoSuchModule(name))
                });
            }
        }

        Err(CompileError::new(CompileErrorKind::NoSuchModule(name)))
    }
}

/// The import-resolution pass
pub struct ResolveImports<'a> {
    env: &'a mut Env,
    parser: &'a dyn ModuleParser,
    resolver: &'a ModuleSourceResolver,
}

impl<'a> ResolveImports<'a> {
    pub fn new(
        env: &'a mut Env,
        parser: &'a dyn ModuleParser,
        resolver: &'a ModuleSourceResolver,
    ) -> Self {
        Self {
            env,
            parser,
            resolver,
        }
    }
}

impl Rewriter for ResolveImports<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    // Imported symbols are not known yet while this pass runs, so nothing
    // may be typed here
    fn runs_declaration_scan(&self) -> bool {
        false
    }

    fn rewrite_import(&mut self, statement: &ast::Import) -> CompileResult<Statement> {
        let name = statement.module_name.symbol;

        // Idempotent memoization: a module is spliced at most once per run
        if self.env.module_already_lowered(name) {
            return Ok(Statement::Seq(ast::Seq {
                span: statement.span,
                children: Vec::new(),
            }));
        }
        self.env.mark_module_lowered(name);

        let source = self
            .resolver
            .resolve(name)
            .map_err(|mut error| {
                error.location = error.location.or(Some(statement.span));
                error
            })?;

        let parsed = self
            .parser
            .parse(&source, &format!("{name}.snap"))
            .map_err(|error| {
                CompileError::at(
                    statement.span,
                    CompileErrorKind::ParseFailed {
                        module: name,
                        message: error.to_string(),
                    },
                )
            })?;

        // Resolve the module's own imports before splicing it in
        let lowered = self.rewrite_statement(&parsed)?;

        let children = match lowered {
            Statement::Block(block) => block.children,
            other => vec![other],
        };

        Ok(Statement::Seq(ast::Seq {
            span: statement.span,
            children,
        }))
    }
}
