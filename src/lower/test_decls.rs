//! Test declaration hoisting. `test "name" { ... }` statements become
//! ordinary functions with synthesized names, and the original test names
//! are collected so the embedding driver can enumerate and run them.

use crate::{
    ast::{self, Expression, Identifier, Statement, Visibility},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    lower::Rewriter,
    sema::{Env, types::Type},
    source::Span,
};

pub struct HoistTests<'a> {
    env: &'a mut Env,
    seen: hashbrown::HashSet<InternedSymbol>,
    /// Discovered test names, in declaration order
    pub test_names: Vec<String>,
}

impl<'a> HoistTests<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self {
            env,
            seen: hashbrown::HashSet::new(),
            test_names: Vec::new(),
        }
    }
}

/// `test "two plus two"` becomes `__test_0_two_plus_two`
fn mangle_test_name(index: usize, name: InternedSymbol) -> InternedSymbol {
    let sanitized: String = name
        .value()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    InternedSymbol::new(&format!("__test_{index}_{sanitized}"))
}

impl Rewriter for HoistTests<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_test_declaration(&mut self, decl: &ast::TestDeclaration) -> CompileResult<Statement> {
        if !self.seen.insert(decl.name.symbol) {
            return Err(CompileError::at(
                decl.name.span,
                CompileErrorKind::RedefinedTest(decl.name.symbol),
            ));
        }

        let index = self.test_names.len();
        self.test_names.push(decl.name.symbol.value().to_string());

        let function = ast::FunctionDeclaration {
            decl_id: ast::DeclId::fresh(),
            span: decl.span,
            identifier: Identifier::new(mangle_test_name(index, decl.name.symbol), decl.name.span),
            function_type: ast::FunctionTypeExpression {
                span: Span::SYNTHESIZED,
                return_type: Box::new(Expression::primitive_type(Type::Void)),
                arguments: Vec::new(),
            },
            parameter_names: Vec::new(),
            type_arguments: Vec::new(),
            body: decl.body.clone(),
            visibility: Visibility::Private,
        };

        crate::lower::walk_function_declaration(self, &function)
            .map(Statement::FunctionDeclaration)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{ast::Block, sema::layout::SixteenBitLayout};

    fn test_statement(name: &str) -> Statement {
        Statement::TestDeclaration(ast::TestDeclaration {
            span: Span::SYNTHESIZED,
            name: Identifier::synthesized(name),
            body: Block::empty(),
        })
    }

    #[test]
    fn tests_hoist_to_functions_and_names_are_collected() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![test_statement("two plus two"), test_statement("shifts")],
        ));

        let mut pass = HoistTests::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        assert_eq!(pass.test_names, vec!["two plus two", "shifts"]);

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::FunctionDeclaration(first) = &block.children[0] else {
            panic!("expected hoisted function");
        };
        assert_eq!(first.identifier.symbol.value(), "__test_0_two_plus_two");
    }

    #[test]
    fn duplicate_test_names_are_rejected() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![test_statement("dup"), test_statement("dup")],
        ));

        let mut pass = HoistTests::new(&mut env);
        let error = pass.run(Some(&root)).unwrap_err();

        assert_eq!(
            error.kind,
            CompileErrorKind::RedefinedTest(InternedSymbol::new("dup"))
        );
    }
}
