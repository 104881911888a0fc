//! Union erasure. Every union type becomes a synthesized representation
//! struct of a one-byte tag plus a payload sized for the largest member:
//!
//! ```text
//! u16 | bool   ->   struct __unionN { tag: u8, payload: [2]u8 }
//! ```
//!
//! and the three union operations become struct operations:
//!
//!   - construction (`x as u16|bool` in an initializer or assignment)
//!     becomes a tag store plus a payload store through a reinterpreted
//!     pointer,
//!   - the dynamic type test (`u is u16`) becomes a tag comparison,
//!   - narrowing (`u as u16`) becomes a payload read through a
//!     reinterpreted pointer.
//!
//! Representation structs are deduplicated structurally and their
//! declarations appended at the top level.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::{
    ast::{self, Expression, Identifier, Statement, StorageQualifier, UnaryOperator, Visibility},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    lower::{Rewriter, bind_var_declaration, walk_block_children},
    sema::{
        Env,
        rvalue::check_rvalue,
        symbols::ScopeKind,
        type_context::check_type_expression,
        types::{StructField, StructTypeInfo, Type, UnionTypeInfo},
    },
    source::Span,
};

pub struct EraseUnions<'a> {
    env: &'a mut Env,
    /// Structural member list -> representation struct
    representations: HashMap<Vec<Type>, Rc<StructTypeInfo>>,
    /// Representation struct name -> the union it stands for
    by_name: HashMap<InternedSymbol, Rc<UnionTypeInfo>>,
    pending: Vec<Statement>,
    block_depth: usize,
}

impl<'a> EraseUnions<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self {
            env,
            representations: HashMap::new(),
            by_name: HashMap::new(),
            pending: Vec::new(),
            block_depth: 0,
        }
    }

    fn representation_for(&mut self, info: &UnionTypeInfo) -> Rc<StructTypeInfo> {
        let key: Vec<Type> = info
            .members
            .iter()
            .map(|member| member.corresponding_mutable())
            .collect();

        if let Some(existing) = self.representations.get(&key) {
            return existing.clone();
        }

        let payload_size = info
            .members
            .iter()
            .map(|member| self.env.layout().size_of(member))
            .max()
            .unwrap_or(0);

        let name = self.env.temp_name("union");
        let repr = Rc::new(StructTypeInfo {
            name,
            fields: vec![
                StructField {
                    name: InternedSymbol::new("tag"),
                    ty: Type::U8,
                },
                StructField {
                    name: InternedSymbol::new("payload"),
                    ty: Type::Array {
                        count: payload_size,
                        element: Box::new(Type::U8),
                    },
                },
            ],
        });

        self.env.bind_type_global(name, Type::Struct(repr.clone()));
        self.representations.insert(key, repr.clone());
        self.by_name
            .insert(name, Rc::new(info.clone()));

        self.pending
            .push(Statement::StructDeclaration(ast::StructDeclaration {
                span: Span::SYNTHESIZED,
                identifier: Identifier::synthesized(name),
                members: repr
                    .fields
                    .iter()
                    .map(|field| ast::StructMemberDeclaration {
                        name: Identifier::synthesized(field.name),
                        ty: Expression::primitive_type(field.ty.clone()),
                    })
                    .collect(),
                type_arguments: Vec::new(),
                visibility: Visibility::Public,
            }));

        repr
    }

    /// Rewrites union types to their representation structs, through
    /// pointer and array shells
    fn map_type(&mut self, ty: &Type) -> Type {
        match ty {
            Type::Union(info) => Type::Struct(self.representation_for(info)),
            Type::Pointer(pointee) => Type::Pointer(Box::new(self.map_type(pointee))),
            Type::ConstPointer(pointee) => Type::ConstPointer(Box::new(self.map_type(pointee))),
            Type::Array { count, element } => Type::Array {
                count: *count,
                element: Box::new(self.map_type(element)),
            },
            Type::ConstArray { count, element } => Type::ConstArray {
                count: *count,
                element: Box::new(self.map_type(element)),
            },
            Type::DynamicArray { element } => Type::DynamicArray {
                element: Box::new(self.map_type(element)),
            },
            Type::ConstDynamicArray { element } => Type::ConstDynamicArray {
                element: Box::new(self.map_type(element)),
            },
            other => other.clone(),
        }
    }

    /// The union behind an already-rewritten expression: either it still
    /// types as a union, or it types as a representation struct
    fn union_behind(&mut self, expression: &Expression) -> CompileResult<Option<Rc<UnionTypeInfo>>> {
        let ty = check_rvalue(self.env, expression)?;

        if let Some(info) = ty.union_info() {
            return Ok(Some(info.clone()));
        }

        if let Some(info) = ty.struct_info()
            && let Some(union_info) = self.by_name.get(&info.name)
        {
            return Ok(Some(union_info.clone()));
        }

        Ok(None)
    }

    fn tag_for(
        &mut self,
        union_info: &UnionTypeInfo,
        member: &Type,
        span: Span,
    ) -> CompileResult<i64> {
        union_info.tag_of(member).map(|tag| tag as i64).ok_or_else(|| {
            CompileError::at(
                span,
                CompileErrorKind::CannotConvert {
                    from: member.to_string(),
                    to: Type::Union(Rc::new(union_info.clone())).to_string(),
                },
            )
        })
    }

    /// `target.payload` reinterpreted as a `*T`, dereferenced
    fn payload_access(&mut self, target: Expression, member_ty: &Type, span: Span) -> Expression {
        Expression::Get(ast::Get {
            span,
            expr: Box::new(Expression::Bitcast(ast::Bitcast {
                span,
                expr: Box::new(Expression::Unary(ast::Unary {
                    span,
                    operator: UnaryOperator::AddressOf,
                    child: Box::new(Expression::Get(ast::Get {
                        span,
                        expr: Box::new(target),
                        member: Identifier::new(InternedSymbol::new("payload"), span),
                    })),
                })),
                target_type: Type::Pointer(Box::new(member_ty.clone())),
            })),
            member: Identifier::new(InternedSymbol::new("pointee"), span),
        })
    }

    /// The two stores that implement storing `value` into union storage
    /// `target`
    fn construction_statements(
        &mut self,
        target: Expression,
        union_info: &UnionTypeInfo,
        value: Expression,
        span: Span,
    ) -> CompileResult<Vec<Statement>> {
        let raw_ty = check_rvalue(self.env, &value)?;

        // Pick the member the stored value actually is; a compile time
        // constant lands in the first member that can hold it
        let (value_ty, value) = match union_info.tag_of(&raw_ty.corresponding_mutable()) {
            Some(_) => (raw_ty.corresponding_mutable(), value),
            None => {
                let member = union_info
                    .members
                    .iter()
                    .find(|member| {
                        crate::sema::convert::can_convert(
                            self.env,
                            &raw_ty,
                            member,
                            crate::sema::convert::ConversionKind::Implicit,
                        )
                    })
                    .cloned()
                    .map(|member| member.corresponding_mutable());

                match member {
                    Some(member) => {
                        let converted = Expression::As(ast::As {
                            span,
                            expr: Box::new(value),
                            target_type: Box::new(Expression::primitive_type(member.clone())),
                        });
                        (member, converted)
                    }
                    None => (raw_ty.corresponding_mutable(), value),
                }
            }
        };

        let tag = self.tag_for(union_info, &value_ty, span)?;

        let tag_store = Statement::Expression(Expression::InitialAssignment(ast::Assignment {
            span,
            lexpr: Box::new(Expression::Get(ast::Get {
                span,
                expr: Box::new(target.clone()),
                member: Identifier::new(InternedSymbol::new("tag"), span),
            })),
            rexpr: Box::new(Expression::As(ast::As {
                span,
                expr: Box::new(Expression::literal_int(tag)),
                target_type: Box::new(Expression::primitive_type(Type::U8)),
            })),
        }));

        let payload_store =
            Statement::Expression(Expression::InitialAssignment(ast::Assignment {
                span,
                lexpr: Box::new(self.payload_access(target, &value_ty, span)),
                rexpr: Box::new(value),
            }));

        Ok(vec![tag_store, payload_store])
    }

    /// Recognizes `<expr> as <union>` before the default walk turns it into
    /// an expression-position error
    fn as_union_construction(
        &mut self,
        expression: &Expression,
    ) -> CompileResult<Option<(Expression, Rc<UnionTypeInfo>)>> {
        let Expression::As(e) = expression else {
            return Ok(None);
        };

        let target = check_type_expression(self.env, &e.target_type)?;
        let Some(union_info) = target.union_info().cloned() else {
            return Ok(None);
        };

        let value = self.rewrite_expression(&e.expr)?;

        // A union-to-same-union cast is a plain copy of the representation
        if self.union_behind(&value)?.as_deref() == Some(union_info.as_ref()) {
            return Ok(None);
        }

        Ok(Some((value, union_info)))
    }
}

impl Rewriter for EraseUnions<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_block(&mut self, block: &ast::Block) -> CompileResult<Statement> {
        self.block_depth += 1;
        self.env.enter_scope(ScopeKind::Block);

        let result = (|this: &mut Self| {
            let mut children = walk_block_children(this, block)?;

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

    fn rewrite_primitive_type(&mut self, e: &ast::PrimitiveType) -> CompileResult<Expression> {
        Ok(Expression::PrimitiveType(ast::PrimitiveType {
            span: e.span,
            ty: self.map_type(&e.ty),
        }))
    }

    fn rewrite_typealias(&mut self, statement: &ast::Typealias) -> CompileResult<Statement> {
        let ty = check_type_expression(self.env, &statement.expression)?;
        let mapped = self.map_type(&ty);

        Ok(Statement::Typealias(ast::Typealias {
            span: statement.span,
            identifier: statement.identifier.clone(),
            expression: Expression::primitive_type(mapped),
        }))
    }

    fn rewrite_var_declaration(&mut self, decl: &ast::VarDeclaration) -> CompileResult<Statement> {
        // Union construction in an initializer becomes a declaration
        // followed by tag and payload stores
        if let Some(initializer) = &decl.expression
            && let Some((value, union_info)) = self.as_union_construction(initializer)?
        {
            let repr = self.representation_for(&union_info);

            let rewritten = ast::VarDeclaration {
                decl_id: decl.decl_id,
                span: decl.span,
                identifier: decl.identifier.clone(),
                explicit_type: Some(Box::new(Expression::primitive_type(Type::Struct(repr)))),
                expression: None,
                storage: decl.storage,
                is_mutable: decl.is_mutable,
                visibility: decl.visibility,
            };
            bind_var_declaration(self.env, &rewritten)?;

            let target = Expression::Identifier(decl.identifier.clone());
            let mut children = vec![Statement::VarDeclaration(rewritten)];
            children.extend(self.construction_statements(
                target,
                &union_info,
                value,
                decl.span,
            )?);

            return Ok(Statement::Seq(ast::Seq {
                span: decl.span,
                children,
            }));
        }

        crate::lower::walk_var_declaration(self, decl)
    }

    fn rewrite_expression_statement(&mut self, expression: &Expression) -> CompileResult<Statement> {
        // Union construction in an assignment becomes tag and payload stores
        if let Expression::Assignment(e) | Expression::InitialAssignment(e) = expression
            && let Some((value, union_info)) = self.as_union_construction(&e.rexpr)?
        {
            let target = self.rewrite_expression(&e.lexpr)?;
            let children =
                self.construction_statements(target, &union_info, value, e.span)?;

            return Ok(Statement::Seq(ast::Seq {
                span: e.span,
                children,
            }));
        }

        Ok(Statement::Expression(self.rewrite_expression(expression)?))
    }

    fn rewrite_is(&mut self, e: &ast::Is) -> CompileResult<Expression> {
        let expr = self.rewrite_expression(&e.expr)?;

        let Some(union_info) = self.union_behind(&expr)? else {
            // Non-union tests were folded by compile time expression erasure
            return Err(CompileError::internal(
                "a dynamic `is` test survived on a non-union value",
            ));
        };

        let test = check_type_expression(self.env, &e.test_type)?;
        let tag = self.tag_for(&union_info, &test.corresponding_mutable(), e.span)?;

        Ok(Expression::Binary(ast::Binary {
            span: e.span,
            operator: crate::ast::BinaryOperator::Equals,
            left: Box::new(Expression::Get(ast::Get {
                span: e.span,
                expr: Box::new(expr),
                member: Identifier::new(InternedSymbol::new("tag"), e.span),
            })),
            right: Box::new(Expression::As(ast::As {
                span: e.span,
                expr: Box::new(Expression::literal_int(tag)),
                target_type: Box::new(Expression::primitive_type(Type::U8)),
            })),
        }))
    }

    fn rewrite_as(&mut self, e: &ast::As) -> CompileResult<Expression> {
        let expr = self.rewrite_expression(&e.expr)?;
        let target = check_type_expression(self.env, &e.target_type)?;

        if let Some(union_info) = self.union_behind(&expr)? {
            // A cast back to the union itself is a plain copy of the
            // representation
            if target.union_info().is_some() {
                return Ok(expr);
            }

            // Narrowing reads the payload through a reinterpreted pointer
            let member = target.corresponding_mutable();
            self.tag_for(&union_info, &member, e.span)?;

            return Ok(self.payload_access(expr, &member, e.span));
        }

        if target.union_info().is_some() {
            return Err(CompileError::internal(
                "union construction is only supported in assignment or initialization position",
            ));
        }

        Ok(Expression::As(ast::As {
            span: e.span,
            expr: Box::new(expr),
            target_type: Box::new(self.rewrite_expression(&e.target_type)?),
        }))
    }
}
