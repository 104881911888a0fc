//! Sequence flattening. The lowering passes leave nested `Seq` nodes
//! wherever one statement expanded into several; here they dissolve into
//! their parents, so the emitter sees plain statement lists. Flattening an
//! already-flat tree returns it unchanged.

use crate::{
    ast::{self, Statement},
    diagnostics::CompileResult,
    lower::Rewriter,
    sema::Env,
};

pub struct FlattenSeqs<'a> {
    env: &'a mut Env,
}

impl<'a> FlattenSeqs<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }
}

fn splice(into: &mut Vec<Statement>, statement: Statement) {
    match statement {
        Statement::Seq(seq) => {
            for child in seq.children {
                splice(into, child);
            }
        }
        other => into.push(other),
    }
}

impl Rewriter for FlattenSeqs<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    // Purely structural; nothing is typed or bound here
    fn runs_declaration_scan(&self) -> bool {
        false
    }

    fn rewrite_var_declaration(&mut self, decl: &ast::VarDeclaration) -> CompileResult<Statement> {
        Ok(Statement::VarDeclaration(decl.clone()))
    }

    fn rewrite_block(&mut self, block: &ast::Block) -> CompileResult<Statement> {
        let mut children = Vec::with_capacity(block.children.len());

        for child in &block.children {
            splice(&mut children, self.rewrite_statement(child)?);
        }

        Ok(Statement::Block(ast::Block {
            span: block.span,
            children,
        }))
    }

    fn rewrite_seq(&mut self, seq: &ast::Seq) -> CompileResult<Statement> {
        let mut children = Vec::with_capacity(seq.children.len());

        for child in &seq.children {
            splice(&mut children, self.rewrite_statement(child)?);
        }

        Ok(Statement::Seq(ast::Seq {
            span: seq.span,
            children,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::{Block, Expression, Seq},
        sema::layout::SixteenBitLayout,
        source::Span,
    };

    fn marker(value: i64) -> Statement {
        Statement::Expression(Expression::literal_int(value))
    }

    #[test]
    fn nested_seqs_dissolve_into_the_enclosing_block() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                marker(1),
                Statement::Seq(Seq {
                    span: Span::SYNTHESIZED,
                    children: vec![
                        marker(2),
                        Statement::Seq(Seq {
                            span: Span::SYNTHESIZED,
                            children: vec![marker(3)],
                        }),
                    ],
                }),
                marker(4),
            ],
        ));

        let mut pass = FlattenSeqs::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        assert_eq!(
            result,
            Statement::Block(Block::new(
                Span::SYNTHESIZED,
                vec![marker(1), marker(2), marker(3), marker(4)],
            ))
        );
    }

    #[test]
    fn flattening_an_already_flat_tree_is_the_identity() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![marker(1), marker(2), marker(3)],
        ));

        let mut pass = FlattenSeqs::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        assert_eq!(result, root);
    }

    #[test]
    fn empty_seqs_vanish() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                Statement::Seq(Seq {
                    span: Span::SYNTHESIZED,
                    children: vec![],
                }),
                marker(1),
            ],
        ));

        let mut pass = FlattenSeqs::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        assert_eq!(
            result,
            Statement::Block(Block::new(Span::SYNTHESIZED, vec![marker(1)]))
        );
    }
}
