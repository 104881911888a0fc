//! Escape analysis. Declarations fall into two storage classes: everything
//! the source program declared, plus any temporary whose address is taken,
//! stays memory-resident; compiler temporaries of primitive type that never
//! escape are promoted to register storage and will never touch the frame.
//!
//! Two passes over the tree: the first collects the set of escaping
//! declaration identities (keyed by [`DeclId`], scope-aware so shadowed
//! names resolve to the right declaration site), the second rewrites the
//! storage class of everything that did not escape.
//!
//! This runs after variable-declaration and implicit-conversion lowering so
//! every declaration has a concrete type and every address-of operation is
//! syntactically explicit.

use hashbrown::{HashMap, HashSet};

use crate::{
    ast::{self, DeclId, Expression, Statement, StorageQualifier, UnaryOperator},
    diagnostics::CompileResult,
    lower::{Rewriter, walk_block, walk_var_declaration},
    sema::Env,
};

pub fn analyze_escapes(
    env: &mut Env,
    statement: Option<&Statement>,
) -> CompileResult<Option<Statement>> {
    let mut collector = CollectEscapes {
        env: &mut *env,
        escaping: HashSet::new(),
        scopes: vec![HashMap::new()],
    };
    collector.run(statement)?;

    let escaping = collector.escaping;

    // The rewrite re-binds everything the collector bound
    env.begin_pass();

    let mut rewriter = RewriteStorage { env, escaping };
    rewriter.run(statement)
}

/// Forward pass collecting escaping declaration identities
struct CollectEscapes<'a> {
    env: &'a mut Env,
    escaping: HashSet<DeclId>,
    /// Shadowing-aware map from names to declaration sites
    scopes: Vec<HashMap<crate::intern::InternedSymbol, DeclId>>,
}

impl CollectEscapes<'_> {
    fn declaration_of(&self, name: crate::intern::InternedSymbol) -> Option<DeclId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).copied())
    }

    /// The variable whose storage an lvalue expression ultimately names
    fn base_identifier(expression: &Expression) -> Option<&ast::Identifier> {
        match expression {
            Expression::Identifier(identifier) => Some(identifier),
            Expression::Get(get) => Self::base_identifier(&get.expr),
            Expression::Subscript(subscript) => Self::base_identifier(&subscript.subscriptable),
            Expression::Bitcast(bitcast) => Self::base_identifier(&bitcast.expr),
            Expression::As(e) => Self::base_identifier(&e.expr),
            _ => None,
        }
    }
}

impl Rewriter for CollectEscapes<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_block(&mut self, block: &ast::Block) -> CompileResult<Statement> {
        self.scopes.push(HashMap::new());
        let result = walk_block(self, block);
        self.scopes.pop();
        result
    }

    fn rewrite_var_declaration(&mut self, decl: &ast::VarDeclaration) -> CompileResult<Statement> {
        let rewritten = walk_var_declaration(self, decl)?;

        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(decl.identifier.symbol, decl.decl_id);

        // Explicitly declared variables and aggregate temporaries are
        // memory-resident by definition
        let is_register_candidate = Env::is_temp_name(decl.identifier.symbol)
            && self
                .env
                .lookup(decl.identifier.symbol)
                .is_some_and(|symbol| symbol.ty.is_primitive_scalar());

        if !is_register_candidate {
            self.escaping.insert(decl.decl_id);
        }

        Ok(rewritten)
    }

    fn rewrite_unary(&mut self, e: &ast::Unary) -> CompileResult<Expression> {
        if e.operator == UnaryOperator::AddressOf
            && let Some(identifier) = Self::base_identifier(&e.child)
            && let Some(decl_id) = self.declaration_of(identifier.symbol)
        {
            self.escaping.insert(decl_id);
        }

        Ok(Expression::Unary(ast::Unary {
            span: e.span,
            operator: e.operator,
            child: Box::new(self.rewrite_expression(&e.child)?),
        }))
    }
}

/// Second pass: everything that did not escape becomes register-resident
struct RewriteStorage<'a> {
    env: &'a mut Env,
    escaping: HashSet<DeclId>,
}

impl Rewriter for RewriteStorage<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_var_declaration(&mut self, decl: &ast::VarDeclaration) -> CompileResult<Statement> {
        let storage = if self.escaping.contains(&decl.decl_id) {
            decl.storage
        } else {
            StorageQualifier::Register
        };

        walk_var_declaration(
            self,
            &ast::VarDeclaration {
                storage,
                ..decl.clone()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::{Block, Identifier, Visibility},
        sema::{layout::SixteenBitLayout, types::Type},
        source::Span,
    };

    fn temp_decl(name: &str, initializer: Expression) -> ast::VarDeclaration {
        ast::VarDeclaration {
            decl_id: DeclId::fresh(),
            span: Span::SYNTHESIZED,
            identifier: Identifier::synthesized(name),
            explicit_type: Some(Box::new(Expression::primitive_type(Type::U16))),
            expression: Some(Box::new(initializer)),
            storage: StorageQualifier::Automatic,
            is_mutable: true,
            visibility: Visibility::Private,
        }
    }

    fn storage_of(result: &Statement, index: usize) -> StorageQualifier {
        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::VarDeclaration(decl) = &block.children[index] else {
            panic!("expected declaration at index {index}");
        };
        decl.storage
    }

    #[test]
    fn primitive_temporaries_become_register_resident() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::VarDeclaration(temp_decl(
                "__t0",
                Expression::literal_int(1),
            ))],
        ));

        let result = analyze_escapes(&mut env, Some(&root)).unwrap().unwrap();
        assert_eq!(storage_of(&result, 0), StorageQualifier::Register);
    }

    #[test]
    fn address_taken_temporaries_stay_in_memory() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                Statement::VarDeclaration(temp_decl("__t0", Expression::literal_int(1))),
                Statement::Expression(Expression::Unary(ast::Unary {
                    span: Span::SYNTHESIZED,
                    operator: UnaryOperator::AddressOf,
                    child: Box::new(Expression::identifier("__t0")),
                })),
            ],
        ));

        let result = analyze_escapes(&mut env, Some(&root)).unwrap().unwrap();
        assert_eq!(storage_of(&result, 0), StorageQualifier::Automatic);
    }

    #[test]
    fn source_declared_variables_stay_in_memory() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::VarDeclaration(temp_decl(
                "counter",
                Expression::literal_int(1),
            ))],
        ));

        let result = analyze_escapes(&mut env, Some(&root)).unwrap().unwrap();
        assert_eq!(storage_of(&result, 0), StorageQualifier::Automatic);
    }

    #[test]
    fn shadowed_names_mark_the_right_declaration() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));

        let outer = temp_decl("__t0", Expression::literal_int(1));
        let inner = temp_decl("__t0", Expression::literal_int(2));
        let outer_id = outer.decl_id;
        let inner_id = inner.decl_id;
        assert_ne!(outer_id, inner_id);

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                Statement::VarDeclaration(outer),
                Statement::Block(Block::new(
                    Span::SYNTHESIZED,
                    vec![
                        Statement::VarDeclaration(inner),
                        // Takes the inner declaration's address
                        Statement::Expression(Expression::Unary(ast::Unary {
                            span: Span::SYNTHESIZED,
                            operator: UnaryOperator::AddressOf,
                            child: Box::new(Expression::identifier("__t0")),
                        })),
                    ],
                )),
            ],
        ));

        let result = analyze_escapes(&mut env, Some(&root)).unwrap().unwrap();

        // The outer temporary still qualifies for a register; the inner one
        // escaped
        assert_eq!(storage_of(&result, 0), StorageQualifier::Register);

        let Statement::Block(block) = &result else {
            unreachable!()
        };
        let Statement::Block(inner_block) = &block.children[1] else {
            panic!("expected inner block");
        };
        let Statement::VarDeclaration(inner_decl) = &inner_block.children[0] else {
            panic!("expected inner declaration");
        };
        assert_eq!(inner_decl.storage, StorageQualifier::Automatic);
    }
}
