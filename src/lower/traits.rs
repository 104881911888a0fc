//! Vtable and trait-object synthesis. A trait declaration lowers to a pair
//! of ordinary structs plus a typealias:
//!
//! ```text
//! trait Shape {                    struct __Shape_vtable {
//!     area: func (*Shape) -> u16       area: *const func (*void) -> u16
//! }                                }
//!                                  struct __Shape_object {
//!                                      object: *void
//!                                      vtable: *const __Shape_vtable
//!                                  }
//!                                  typealias Shape = __Shape_object
//! ```
//!
//! An `impl Shape for Circle` block is checked for conformance and gains a
//! static vtable instance whose fields are the mangled impl methods. Method
//! call erasure later routes dynamic dispatch through these structs.

use std::rc::Rc;

use itertools::Itertools;

use crate::{
    ast::{self, Expression, Identifier, Statement, StorageQualifier, Visibility},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    lower::{Rewriter, vtable_instance_name, walk_impl_for},
    sema::{
        Env,
        type_context::check_type_expression,
        types::{StructField, StructTypeInfo, TraitTypeInfo, Type},
    },
    source::Span,
};

pub struct SynthesizeVtables<'a> {
    env: &'a mut Env,
}

impl<'a> SynthesizeVtables<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }
}

/// The struct type holding one function pointer per trait method
pub fn vtable_struct_info(info: &TraitTypeInfo) -> Rc<StructTypeInfo> {
    Rc::new(StructTypeInfo {
        name: info.vtable_name(),
        fields: info
            .methods
            .iter()
            .map(|method| StructField {
                name: method.name,
                ty: Type::ConstPointer(Box::new(Type::Function(method.ty.clone()))),
            })
            .collect(),
    })
}

/// The (data pointer, vtable pointer) pair struct a trait erases to
pub fn trait_object_struct_info(info: &TraitTypeInfo) -> Rc<StructTypeInfo> {
    Rc::new(StructTypeInfo {
        name: info.object_name(),
        fields: vec![
            StructField {
                name: crate::intern::InternedSymbol::new("object"),
                ty: Type::Pointer(Box::new(Type::Void)),
            },
            StructField {
                name: crate::intern::InternedSymbol::new("vtable"),
                ty: Type::ConstPointer(Box::new(Type::Struct(vtable_struct_info(info)))),
            },
        ],
    })
}

fn struct_declaration_for(info: &StructTypeInfo, span: Span) -> Statement {
    Statement::StructDeclaration(ast::StructDeclaration {
        span,
        identifier: Identifier::new(info.name, span),
        members: info
            .fields
            .iter()
            .map(|field| ast::StructMemberDeclaration {
                name: Identifier::new(field.name, span),
                ty: Expression::primitive_type(field.ty.clone()),
            })
            .collect(),
        type_arguments: Vec::new(),
        visibility: Visibility::Public,
    })
}

impl Rewriter for SynthesizeVtables<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_trait_declaration(
        &mut self,
        decl: &ast::TraitDeclaration,
    ) -> CompileResult<Statement> {
        let ty = self
            .env
            .resolve_type(decl.identifier.symbol, decl.identifier.span)?;
        let Some(info) = ty.trait_info().cloned() else {
            return Err(CompileError::internal(format!(
                "trait declaration `{}` did not scan to a trait type",
                decl.identifier.symbol
            )));
        };

        let vtable = vtable_struct_info(&info);
        let object = trait_object_struct_info(&info);

        self.env.register_trait_object(object.name, info.clone());

        Ok(Statement::Seq(ast::Seq {
            span: decl.span,
            children: vec![
                struct_declaration_for(&vtable, decl.span),
                struct_declaration_for(&object, decl.span),
                // From the next pass onward the trait's name denotes its
                // object struct
                Statement::Typealias(ast::Typealias {
                    span: decl.span,
                    identifier: decl.identifier.clone(),
                    expression: Expression::Identifier(Identifier::new(object.name, decl.span)),
                }),
            ],
        }))
    }

    fn rewrite_impl_for(&mut self, statement: &ast::ImplFor) -> CompileResult<Statement> {
        if !statement.type_arguments.is_empty() {
            return Ok(Statement::ImplFor(statement.clone()));
        }

        let trait_ty = check_type_expression(self.env, &statement.trait_type_expr)?;
        let struct_ty = check_type_expression(self.env, &statement.struct_type_expr)?;

        let (Some(trait_info), Some(struct_info)) = (
            trait_ty.trait_info().cloned(),
            struct_ty.struct_info().cloned(),
        ) else {
            return Err(CompileError::at(
                statement.span,
                CompileErrorKind::InvalidTypeExpression,
            ));
        };

        self.check_conformance(statement, &trait_info, &struct_info)?;

        let walked = walk_impl_for(self, statement)?;

        let vtable = vtable_struct_info(&trait_info);
        let instance = Statement::VarDeclaration(ast::VarDeclaration {
            decl_id: ast::DeclId::fresh(),
            span: statement.span,
            identifier: Identifier::new(
                vtable_instance_name(trait_info.name, struct_info.name),
                statement.span,
            ),
            explicit_type: Some(Box::new(Expression::primitive_type(Type::Struct(
                vtable.clone(),
            )))),
            expression: Some(Box::new(Expression::StructInitializer(
                ast::StructInitializer {
                    span: statement.span,
                    struct_type_expr: Box::new(Expression::primitive_type(Type::Struct(vtable))),
                    arguments: trait_info
                        .methods
                        .iter()
                        .map(|method| ast::StructInitializerArgument {
                            name: Identifier::new(method.name, statement.span),
                            expression: Expression::Identifier(Identifier::new(
                                crate::lower::mangle_trait_method(
                                    trait_info.name,
                                    struct_info.name,
                                    method.name,
                                ),
                                statement.span,
                            )),
                        })
                        .collect(),
                },
            ))),
            storage: StorageQualifier::Static,
            is_mutable: false,
            visibility: Visibility::Public,
        });

        // Rewriting the instance through the pass binds it for the
        // remainder of this run
        let instance = self.rewrite_statement(&instance)?;

        Ok(Statement::Seq(ast::Seq {
            span: statement.span,
            children: vec![walked, instance],
        }))
    }
}

impl SynthesizeVtables<'_> {
    /// Every trait method must be implemented with a signature that matches
    /// the declaration once `*void` self is substituted with a pointer to
    /// the implementing struct.
    fn check_conformance(
        &mut self,
        statement: &ast::ImplFor,
        trait_info: &TraitTypeInfo,
        struct_info: &StructTypeInfo,
    ) -> CompileResult<()> {
        let mut missing = Vec::new();

        for method in &trait_info.methods {
            let Some(mangled) = self.env.lookup_method(struct_info.name, method.name) else {
                missing.push(method.name.to_string());
                continue;
            };

            let implementation = self.env.resolve(mangled, statement.span)?;
            let Some(actual) = implementation.ty.function_info().cloned() else {
                missing.push(method.name.to_string());
                continue;
            };

            let expected = &method.ty;

            let self_position_matches = match (actual.arguments.first(), expected.arguments.first())
            {
                (Some(actual_self), Some(_)) => match actual_self.pointee() {
                    Some(pointee) => {
                        pointee.struct_info().is_some_and(|info| info.as_ref() == struct_info)
                            || *pointee == Type::Void
                    }
                    None => false,
                },
                (None, None) => true,
                _ => false,
            };

            let rest_matches = actual.arguments.len() == expected.arguments.len()
                && actual
                    .arguments
                    .iter()
                    .zip(expected.arguments.iter())
                    .skip(1)
                    .all(|(a, b)| a == b)
                && actual.return_type == expected.return_type;

            if !self_position_matches || !rest_matches {
                return Err(CompileError::at(
                    statement.span,
                    CompileErrorKind::TraitMethodSignatureMismatch {
                        trait_name: trait_info.name,
                        struct_name: struct_info.name,
                        method: method.name,
                    },
                ));
            }
        }

        if !missing.is_empty() {
            return Err(CompileError::at(
                statement.span,
                CompileErrorKind::MissingTraitMethods {
                    trait_name: trait_info.name,
                    struct_name: struct_info.name,
                    methods: missing.iter().join(", "),
                },
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc as StdRc;

    use super::*;
    use crate::{
        ast::{Block, FunctionTypeExpression, PointerType},
        intern::InternedSymbol,
        sema::layout::SixteenBitLayout,
    };

    fn shape_trait() -> Statement {
        Statement::TraitDeclaration(ast::TraitDeclaration {
            span: Span::SYNTHESIZED,
            identifier: Identifier::synthesized("Shape"),
            members: vec![ast::TraitMemberDeclaration {
                name: Identifier::synthesized("area"),
                ty: Expression::FunctionType(FunctionTypeExpression {
                    span: Span::SYNTHESIZED,
                    return_type: Box::new(Expression::primitive_type(Type::U16)),
                    arguments: vec![Expression::PointerType(PointerType {
                        span: Span::SYNTHESIZED,
                        child: Box::new(Expression::identifier("Shape")),
                    })],
                }),
            }],
            type_arguments: Vec::new(),
            visibility: Visibility::Public,
        })
    }

    fn circle_struct() -> Statement {
        Statement::StructDeclaration(ast::StructDeclaration {
            span: Span::SYNTHESIZED,
            identifier: Identifier::synthesized("Circle"),
            members: vec![ast::StructMemberDeclaration {
                name: Identifier::synthesized("radius"),
                ty: Expression::primitive_type(Type::U16),
            }],
            type_arguments: Vec::new(),
            visibility: Visibility::Public,
        })
    }

    fn area_impl() -> ast::FunctionDeclaration {
        ast::FunctionDeclaration {
            decl_id: ast::DeclId::fresh(),
            span: Span::SYNTHESIZED,
            identifier: Identifier::synthesized("area"),
            function_type: FunctionTypeExpression {
                span: Span::SYNTHESIZED,
                return_type: Box::new(Expression::primitive_type(Type::U16)),
                arguments: vec![Expression::PointerType(PointerType {
                    span: Span::SYNTHESIZED,
                    child: Box::new(Expression::identifier("Circle")),
                })],
            },
            parameter_names: vec![Identifier::synthesized("self")],
            type_arguments: Vec::new(),
            body: Block::new(
                Span::SYNTHESIZED,
                vec![Statement::Return(ast::Return {
                    span: Span::SYNTHESIZED,
                    expression: Some(Expression::literal_int(0)),
                })],
            ),
            visibility: Visibility::Public,
        }
    }

    fn impl_shape_for_circle(children: Vec<ast::FunctionDeclaration>) -> Statement {
        Statement::ImplFor(ast::ImplFor {
            span: Span::SYNTHESIZED,
            type_arguments: Vec::new(),
            trait_type_expr: Expression::identifier("Shape"),
            struct_type_expr: Expression::identifier("Circle"),
            children,
        })
    }

    #[test]
    fn trait_declarations_synthesize_vtable_and_object_structs() {
        let mut env = Env::new(StdRc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(Span::SYNTHESIZED, vec![shape_trait()]));

        let mut pass = SynthesizeVtables::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Seq(seq) = &block.children[0] else {
            panic!("expected synthesized seq");
        };

        assert_eq!(seq.children.len(), 3);
        let Statement::StructDeclaration(vtable) = &seq.children[0] else {
            panic!("expected vtable struct");
        };
        assert_eq!(vtable.identifier.symbol.value(), "__Shape_vtable");

        let Statement::StructDeclaration(object) = &seq.children[1] else {
            panic!("expected object struct");
        };
        assert_eq!(object.identifier.symbol.value(), "__Shape_object");
        assert_eq!(object.members[0].name.symbol.value(), "object");
        assert_eq!(object.members[1].name.symbol.value(), "vtable");

        assert!(matches!(&seq.children[2], Statement::Typealias(_)));
        assert!(
            env.trait_object_info(InternedSymbol::new("__Shape_object"))
                .is_some()
        );
    }

    #[test]
    fn conforming_impl_gains_a_static_vtable_instance() {
        let mut env = Env::new(StdRc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                shape_trait(),
                circle_struct(),
                impl_shape_for_circle(vec![area_impl()]),
            ],
        ));

        let mut pass = SynthesizeVtables::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Seq(seq) = &block.children[2] else {
            panic!("expected impl seq");
        };
        let Statement::VarDeclaration(instance) = &seq.children[1] else {
            panic!("expected vtable instance declaration");
        };
        assert_eq!(
            instance.identifier.symbol.value(),
            "__Shape_Circle_vtable_instance"
        );
    }

    #[test]
    fn missing_methods_fail_conformance() {
        let mut env = Env::new(StdRc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                shape_trait(),
                circle_struct(),
                impl_shape_for_circle(vec![]),
            ],
        ));

        let mut pass = SynthesizeVtables::new(&mut env);
        let error = pass.run(Some(&root)).unwrap_err();

        assert!(matches!(
            error.kind,
            CompileErrorKind::MissingTraitMethods { .. }
        ));
    }
}
