//! Generics monomorphization. Every application of a generic function,
//! struct, or trait is rewritten into a reference to a concrete
//! instantiation: the template declaration is cloned, its type parameters
//! substituted, and the result appended to the top level under a mangled
//! name like `max[u16]`. Template declarations themselves are erased from
//! the output.
//!
//! Type arguments come from an explicit application (`max[u16](a, b)`) or,
//! for calls, are inferred by unifying the declared parameter annotations
//! against the argument types.

use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

use crate::{
    ast::{self, Expression, Identifier, Statement},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    lower::{
        Rewriter, function_type_info, trait_type_info, walk_block_children,
    },
    sema::{
        Env,
        rvalue::check_rvalue,
        symbols::{ScopeKind, Symbol},
        type_context::check_type_expression,
        types::{StructField, StructTypeInfo, Type},
    },
    source::Span,
};

pub struct Monomorphize<'a> {
    env: &'a mut Env,
    /// Instantiations waiting to be appended to the root block
    pending: Vec<Statement>,
    /// Mangled names already instantiated this run
    done: HashSet<InternedSymbol>,
    block_depth: usize,
}

impl<'a> Monomorphize<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self {
            env,
            pending: Vec::new(),
            done: HashSet::new(),
            block_depth: 0,
        }
    }

    fn mangle(name: InternedSymbol, type_arguments: &[Type]) -> InternedSymbol {
        InternedSymbol::new(&format!(
            "{}[{}]",
            name,
            type_arguments.iter().map(|ty| ty.to_string()).join(", ")
        ))
    }

    fn substitution_map(
        parameters: &[Identifier],
        type_arguments: &[Type],
    ) -> HashMap<InternedSymbol, Type> {
        parameters
            .iter()
            .zip(type_arguments.iter())
            .map(|(parameter, ty)| (parameter.symbol, ty.clone()))
            .collect()
    }

    fn check_argument_count(
        &self,
        callee: InternedSymbol,
        expected: usize,
        found: usize,
        span: Span,
    ) -> CompileResult<()> {
        if expected != found {
            return Err(CompileError::at(
                span,
                CompileErrorKind::GenericArgumentCountMismatch {
                    callee,
                    expected,
                    found,
                },
            ));
        }

        Ok(())
    }

    fn instantiate_function(
        &mut self,
        declaration: &ast::FunctionDeclaration,
        type_arguments: &[Type],
    ) -> CompileResult<InternedSymbol> {
        let mangled = Self::mangle(declaration.identifier.symbol, type_arguments);

        if !self.done.insert(mangled) {
            return Ok(mangled);
        }

        let map = Self::substitution_map(&declaration.type_arguments, type_arguments);

        let template = ast::FunctionDeclaration {
            decl_id: ast::DeclId::fresh(),
            identifier: Identifier::new(mangled, declaration.identifier.span),
            type_arguments: Vec::new(),
            ..declaration.clone()
        };

        let mut subst = SubstituteTypeArguments {
            env: &mut *self.env,
            map: &map,
        };
        let Statement::FunctionDeclaration(instantiated) =
            subst.rewrite_statement(&Statement::FunctionDeclaration(template))?
        else {
            return Err(CompileError::internal(
                "type substitution changed the shape of a function declaration",
            ));
        };

        let ty = Type::Function(function_type_info(self.env, &instantiated)?);
        self.env.bind_global(
            mangled,
            Symbol::unbacked(ty, declaration.visibility, Some(declaration.span)),
        );

        self.pending
            .push(Statement::FunctionDeclaration(instantiated));

        Ok(mangled)
    }

    fn instantiate_struct(
        &mut self,
        declaration: &ast::StructDeclaration,
        type_arguments: &[Type],
    ) -> CompileResult<InternedSymbol> {
        let mangled = Self::mangle(declaration.identifier.symbol, type_arguments);

        if !self.done.insert(mangled) {
            return Ok(mangled);
        }

        let map = Self::substitution_map(&declaration.type_arguments, type_arguments);

        let template = ast::StructDeclaration {
            identifier: Identifier::new(mangled, declaration.identifier.span),
            type_arguments: Vec::new(),
            ..declaration.clone()
        };

        let mut subst = SubstituteTypeArguments {
            env: &mut *self.env,
            map: &map,
        };
        let Statement::StructDeclaration(instantiated) =
            subst.rewrite_statement(&Statement::StructDeclaration(template))?
        else {
            return Err(CompileError::internal(
                "type substitution changed the shape of a struct declaration",
            ));
        };

        let fields = instantiated
            .members
            .iter()
            .map(|member| {
                Ok(StructField {
                    name: member.name.symbol,
                    ty: check_type_expression(self.env, &member.ty)?,
                })
            })
            .collect::<CompileResult<Vec<_>>>()?;

        self.env.bind_type_global(
            mangled,
            Type::Struct(Rc::new(StructTypeInfo {
                name: mangled,
                fields,
            })),
        );

        self.pending.push(Statement::StructDeclaration(instantiated));

        Ok(mangled)
    }

    fn instantiate_trait(
        &mut self,
        declaration: &ast::TraitDeclaration,
        type_arguments: &[Type],
    ) -> CompileResult<InternedSymbol> {
        let mangled = Self::mangle(declaration.identifier.symbol, type_arguments);

        if !self.done.insert(mangled) {
            return Ok(mangled);
        }

        let map = Self::substitution_map(&declaration.type_arguments, type_arguments);

        let template = ast::TraitDeclaration {
            identifier: Identifier::new(mangled, declaration.identifier.span),
            type_arguments: Vec::new(),
            ..declaration.clone()
        };

        let mut subst = SubstituteTypeArguments {
            env: &mut *self.env,
            map: &map,
        };
        let Statement::TraitDeclaration(instantiated) =
            subst.rewrite_statement(&Statement::TraitDeclaration(template))?
        else {
            return Err(CompileError::internal(
                "type substitution changed the shape of a trait declaration",
            ));
        };

        let info = trait_type_info(self.env, &instantiated)?;
        self.env.bind_type_global(mangled, Type::Trait(info));

        self.pending.push(Statement::TraitDeclaration(instantiated));

        Ok(mangled)
    }

    /// Infers type arguments for a call by unifying parameter annotations
    /// against actual argument types
    fn infer_type_arguments(
        &mut self,
        declaration: &ast::FunctionDeclaration,
        arguments: &[Expression],
        span: Span,
    ) -> CompileResult<Vec<Type>> {
        let parameters: HashSet<InternedSymbol> = declaration
            .type_arguments
            .iter()
            .map(|parameter| parameter.symbol)
            .collect();

        let mut bindings: HashMap<InternedSymbol, Type> = HashMap::new();

        for (annotation, argument) in declaration
            .function_type
            .arguments
            .iter()
            .zip(arguments.iter())
        {
            let actual = check_rvalue(self.env, argument)?;
            unify(&parameters, annotation, &actual, &mut bindings);
        }

        declaration
            .type_arguments
            .iter()
            .map(|parameter| {
                bindings.get(&parameter.symbol).cloned().ok_or_else(|| {
                    CompileError::at(
                        span,
                        CompileErrorKind::CannotInferTypeArguments(
                            declaration.identifier.symbol,
                        ),
                    )
                })
            })
            .collect()
    }

    fn explicit_type_arguments(
        &mut self,
        application: &ast::GenericTypeApplication,
        expected: usize,
    ) -> CompileResult<Vec<Type>> {
        self.check_argument_count(
            application.identifier.symbol,
            expected,
            application.arguments.len(),
            application.span,
        )?;

        application
            .arguments
            .iter()
            .map(|argument| check_type_expression(self.env, argument))
            .collect()
    }
}

/// Structural unification of one parameter annotation against one actual
/// argument type, accumulating type-parameter bindings. First binding wins;
/// a conflicting second binding surfaces later as an ordinary type error in
/// the instantiated code.
fn unify(
    parameters: &HashSet<InternedSymbol>,
    annotation: &Expression,
    actual: &Type,
    bindings: &mut HashMap<InternedSymbol, Type>,
) {
    match annotation {
        Expression::Identifier(identifier) if parameters.contains(&identifier.symbol) => {
            bindings
                .entry(identifier.symbol)
                .or_insert_with(|| actual.corresponding_mutable());
        }
        Expression::PointerType(pointer) => {
            if let Some(pointee) = actual.pointee() {
                unify(parameters, &pointer.child, pointee, bindings);
            }
        }
        Expression::ConstType(inner) => {
            unify(parameters, &inner.child, &actual.corresponding_mutable(), bindings);
        }
        Expression::ArrayType(array) => {
            if let Some(element) = actual.array_element() {
                unify(parameters, &array.element, element, bindings);
            }
        }
        _ => {}
    }
}

impl Rewriter for Monomorphize<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_block(&mut self, block: &ast::Block) -> CompileResult<Statement> {
        self.block_depth += 1;
        self.env.enter_scope(ScopeKind::Block);

        let result = (|this: &mut Self| {
            let mut children = walk_block_children(this, block)?;

            // Instantiations accumulate while the tree is visited and are
            // appended once we are back at the root. Rewriting them may
            // discover further instantiations, so drain to a fixed point.
            if this.block_depth == 1 {
                while !this.pending.is_empty() {
                    let batch: Vec<_> = this.pending.drain(..).collect();

                    for statement in batch {
                        children.push(this.rewrite_statement(&statement)?);
                    }
                }
            }

            Ok(children)
        })(self);

        self.env.exit_scope();
        self.block_depth -= 1;

        Ok(Statement::Block(ast::Block {
            span: block.span,
            children: result?,
        }))
    }

    // Template declarations are erased; only their instantiations survive
    fn rewrite_function_declaration(
        &mut self,
        decl: &ast::FunctionDeclaration,
    ) -> CompileResult<Statement> {
        if decl.is_generic() {
            return Ok(Statement::Seq(ast::Seq {
                span: decl.span,
                children: Vec::new(),
            }));
        }

        crate::lower::walk_function_declaration(self, decl).map(Statement::FunctionDeclaration)
    }

    fn rewrite_struct_declaration(
        &mut self,
        decl: &ast::StructDeclaration,
    ) -> CompileResult<Statement> {
        if decl.is_generic() {
            return Ok(Statement::Seq(ast::Seq {
                span: decl.span,
                children: Vec::new(),
            }));
        }

        crate::lower::walk_struct_declaration(self, decl)
    }

    fn rewrite_trait_declaration(
        &mut self,
        decl: &ast::TraitDeclaration,
    ) -> CompileResult<Statement> {
        if !decl.type_arguments.is_empty() {
            return Ok(Statement::Seq(ast::Seq {
                span: decl.span,
                children: Vec::new(),
            }));
        }

        Ok(Statement::TraitDeclaration(decl.clone()))
    }

    fn rewrite_call(&mut self, e: &ast::Call) -> CompileResult<Expression> {
        let arguments = e
            .arguments
            .iter()
            .map(|argument| self.rewrite_expression(argument))
            .collect::<CompileResult<Vec<_>>>()?;

        // An inferred application: `max(a, b)` where `max` is generic
        if let Expression::Identifier(identifier) = e.callee.as_ref()
            && let Some(symbol) = self.env.lookup(identifier.symbol)
            && let Type::GenericFunction(info) = &symbol.ty
        {
            let declaration = info.declaration.clone();
            let type_arguments = self.infer_type_arguments(&declaration, &arguments, e.span)?;
            let mangled = self.instantiate_function(&declaration, &type_arguments)?;

            return Ok(Expression::Call(ast::Call {
                span: e.span,
                callee: Box::new(Expression::Identifier(Identifier::new(
                    mangled,
                    identifier.span,
                ))),
                arguments,
            }));
        }

        // An explicit application: `max[u16](a, b)`
        if let Expression::GenericTypeApplication(application) = e.callee.as_ref()
            && let Some(symbol) = self.env.lookup(application.identifier.symbol)
            && let Type::GenericFunction(info) = &symbol.ty
        {
            let declaration = info.declaration.clone();
            let type_arguments =
                self.explicit_type_arguments(application, declaration.type_arguments.len())?;
            let mangled = self.instantiate_function(&declaration, &type_arguments)?;

            return Ok(Expression::Call(ast::Call {
                span: e.span,
                callee: Box::new(Expression::Identifier(Identifier::new(
                    mangled,
                    application.identifier.span,
                ))),
                arguments,
            }));
        }

        Ok(Expression::Call(ast::Call {
            span: e.span,
            callee: Box::new(self.rewrite_expression(&e.callee)?),
            arguments,
        }))
    }

    /// A standalone application in type or value position: `Box[u16]`
    fn rewrite_generic_type_application(
        &mut self,
        e: &ast::GenericTypeApplication,
    ) -> CompileResult<Expression> {
        let name = e.identifier.symbol;

        if let Some(Type::GenericStruct(info)) = self.env.lookup_type(name).cloned() {
            let declaration = info.declaration.clone();
            let type_arguments =
                self.explicit_type_arguments(e, declaration.type_arguments.len())?;
            let mangled = self.instantiate_struct(&declaration, &type_arguments)?;

            return Ok(Expression::Identifier(Identifier::new(
                mangled,
                e.identifier.span,
            )));
        }

        if let Some(Type::GenericTrait(info)) = self.env.lookup_type(name).cloned() {
            let declaration = info.declaration.clone();
            let type_arguments =
                self.explicit_type_arguments(e, declaration.type_arguments.len())?;
            let mangled = self.instantiate_trait(&declaration, &type_arguments)?;

            return Ok(Expression::Identifier(Identifier::new(
                mangled,
                e.identifier.span,
            )));
        }

        if let Some(symbol) = self.env.lookup(name).cloned()
            && let Type::GenericFunction(info) = &symbol.ty
        {
            let declaration = info.declaration.clone();
            let type_arguments =
                self.explicit_type_arguments(e, declaration.type_arguments.len())?;
            let mangled = self.instantiate_function(&declaration, &type_arguments)?;

            return Ok(Expression::Identifier(Identifier::new(
                mangled,
                e.identifier.span,
            )));
        }

        Err(CompileError::at(
            e.span,
            CompileErrorKind::UnresolvedIdentifier(name),
        ))
    }
}

/// Replaces type-parameter identifiers with their concrete types
struct SubstituteTypeArguments<'a> {
    env: &'a mut Env,
    map: &'a HashMap<InternedSymbol, Type>,
}

impl Rewriter for SubstituteTypeArguments<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn runs_declaration_scan(&self) -> bool {
        false
    }

    fn rewrite_identifier(&mut self, identifier: &ast::Identifier) -> CompileResult<Expression> {
        match self.map.get(&identifier.symbol) {
            Some(ty) => Ok(Expression::PrimitiveType(ast::PrimitiveType {
                span: identifier.span,
                ty: ty.clone(),
            })),
            None => Ok(Expression::Identifier(identifier.clone())),
        }
    }
}
