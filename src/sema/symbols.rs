//! The compilation environment: a stack of lexically nested scopes mapping
//! names to symbols and type definitions, the frame arena behind them, and
//! the process-wide counters used to synthesize unique labels and
//! temporaries. One `Env` is threaded by reference through every pass of a
//! compilation run.

use std::rc::Rc;

use hashbrown::{HashMap, HashSet};

use crate::{
    ast::Visibility,
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    index::{Index, IndexVec, simple_index},
    intern::InternedSymbol,
    sema::{
        frame::{Frame, FrameId, GrowthDirection},
        layout::MemoryLayoutStrategy,
        types::{FunctionTypeInfo, Type},
    },
    source::Span,
};

/// Bottom of the data segment on the target; static storage is allocated
/// upward from here.
pub const STATIC_STORAGE_BASE: usize = 0x0010;

simple_index! {
    /// Identifies a scope for debug-info side tables. Monotonic for the life
    /// of an `Env`; never reused until `clear_symbols`.
    pub struct ScopeId;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub ty: Type,
    pub storage: StorageClass,
    pub visibility: Visibility,
    pub location: Option<Span>,
}

impl Symbol {
    /// A symbol with no storage of its own (functions, labels, compile time
    /// constants)
    pub fn unbacked(ty: Type, visibility: Visibility, location: Option<Span>) -> Self {
        Self {
            ty,
            storage: StorageClass::None,
            visibility,
            location,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    /// Fixed offset within the data segment
    Static { offset: usize },
    /// Frame-pointer-relative offset within the enclosing activation record
    Automatic { offset: usize },
    /// Lives only in a register; never has an address
    Register,
    /// Occupies no storage at all
    None,
}

#[derive(Debug, Clone)]
pub enum ScopeKind {
    Block,
    Function {
        name: InternedSymbol,
        ty: Rc<FunctionTypeInfo>,
    },
}

#[derive(Debug)]
struct Scope {
    id: ScopeId,
    kind: ScopeKind,
    /// Value namespace
    symbols: HashMap<InternedSymbol, Symbol>,
    /// Type namespace; separate from values
    types: HashMap<InternedSymbol, Type>,
    frame: FrameId,
}

pub struct Env {
    scopes: Vec<Scope>,
    frames: IndexVec<FrameId, Frame>,
    static_frame: FrameId,
    next_scope_index: usize,
    label_counter: u32,
    temp_counter: u32,
    /// Modules that have already been parsed and lowered this run
    modules_lowered: HashSet<InternedSymbol>,
    /// (struct, method) -> mangled free function
    methods: HashMap<(InternedSymbol, InternedSymbol), InternedSymbol>,
    /// (struct, trait) -> vtable instance symbol
    conformances: HashMap<(InternedSymbol, InternedSymbol), InternedSymbol>,
    /// Synthesized trait-object struct name -> the trait it erases
    trait_objects: HashMap<InternedSymbol, Rc<crate::sema::types::TraitTypeInfo>>,
    layout: Rc<dyn MemoryLayoutStrategy>,
}

impl Env {
    pub fn new(layout: Rc<dyn MemoryLayoutStrategy>) -> Self {
        let mut frames = IndexVec::new();
        let static_frame = frames.push(Frame::new(GrowthDirection::Up, STATIC_STORAGE_BASE));

        let mut env = Self {
            scopes: Vec::new(),
            frames,
            static_frame,
            next_scope_index: 0,
            label_counter: 0,
            temp_counter: 0,
            modules_lowered: HashSet::new(),
            methods: HashMap::new(),
            conformances: HashMap::new(),
            trait_objects: HashMap::new(),
            layout,
        };

        env.push_scope(ScopeKind::Block, static_frame);
        env
    }

    pub fn layout(&self) -> &dyn MemoryLayoutStrategy {
        self.layout.as_ref()
    }

    pub fn layout_rc(&self) -> Rc<dyn MemoryLayoutStrategy> {
        self.layout.clone()
    }

    /* Scope management */

    fn push_scope(&mut self, kind: ScopeKind, frame: FrameId) {
        let id = ScopeId::new(self.next_scope_index);
        self.next_scope_index += 1;

        self.scopes.push(Scope {
            id,
            kind,
            symbols: HashMap::new(),
            types: HashMap::new(),
            frame,
        });
    }

    /// Enters a scope. A block scope shares its parent's frame (same
    /// activation record); a function scope establishes a fresh downward
    /// growing frame.
    pub fn enter_scope(&mut self, kind: ScopeKind) {
        let frame = match kind {
            ScopeKind::Block => self.current_scope().frame,
            ScopeKind::Function { .. } => self.frames.push(Frame::new(GrowthDirection::Down, 0)),
        };

        self.push_scope(kind, frame);
    }

    pub fn exit_scope(&mut self) {
        assert!(
            self.scopes.len() > 1,
            "attempted to exit the global scope"
        );

        self.scopes.pop();
    }

    fn current_scope(&self) -> &Scope {
        self.scopes.last().expect("scope stack is never empty")
    }

    fn current_scope_mut(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    pub fn current_scope_id(&self) -> ScopeId {
        self.current_scope().id
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// The name and type of the function whose body is currently being
    /// visited, for validating `return`
    pub fn enclosing_function(&self) -> Option<(InternedSymbol, Rc<FunctionTypeInfo>)> {
        self.scopes.iter().rev().find_map(|scope| match &scope.kind {
            ScopeKind::Function { name, ty } => Some((*name, ty.clone())),
            ScopeKind::Block => None,
        })
    }

    /* Binding and resolution */

    pub fn is_locally_bound(&self, name: InternedSymbol) -> bool {
        self.current_scope().symbols.contains_key(&name)
    }

    pub fn is_type_locally_bound(&self, name: InternedSymbol) -> bool {
        self.current_scope().types.contains_key(&name)
    }

    /// Binds a symbol in the innermost scope. Redefinition within the same
    /// scope is rejected by the *callers* (which know whether they are
    /// binding a variable, function, type, etc. and phrase the error
    /// accordingly); the table itself permits rebinding.
    pub fn bind(&mut self, name: InternedSymbol, symbol: Symbol) {
        self.current_scope_mut().symbols.insert(name, symbol);
    }

    pub fn bind_type(&mut self, name: InternedSymbol, ty: Type) {
        self.current_scope_mut().types.insert(name, ty);
    }

    /// Binds a symbol in the outermost scope, regardless of nesting. Used by
    /// passes that synthesize top-level declarations (monomorphized
    /// functions, union representations) while visiting nested code.
    pub fn bind_global(&mut self, name: InternedSymbol, symbol: Symbol) {
        self.scopes[0].symbols.insert(name, symbol);
    }

    pub fn bind_type_global(&mut self, name: InternedSymbol, ty: Type) {
        self.scopes[0].types.insert(name, ty);
    }

    /// Binds a symbol and allocates backing storage for it from the current
    /// scope's frame, advancing the storage pointer.
    pub fn bind_with_storage(
        &mut self,
        name: InternedSymbol,
        ty: Type,
        visibility: Visibility,
        location: Option<Span>,
    ) -> Symbol {
        let size = self.layout.size_of(&ty);
        let frame_id = self.current_scope().frame;
        let frame = &mut self.frames[frame_id];
        let offset = frame.allocate(size);

        let storage = if frame_id == self.static_frame {
            StorageClass::Static { offset }
        } else {
            StorageClass::Automatic { offset }
        };

        let symbol = Symbol {
            ty,
            storage,
            visibility,
            location,
        };

        frame.add_symbol(name, symbol.clone());
        self.bind(name, symbol.clone());
        symbol
    }

    pub fn lookup(&self, name: InternedSymbol) -> Option<&Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.symbols.get(&name))
    }

    pub fn lookup_type(&self, name: InternedSymbol) -> Option<&Type> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.types.get(&name))
    }

    /// Walks the scope chain outward and returns the nearest binding
    pub fn resolve(&self, name: InternedSymbol, span: Span) -> CompileResult<Symbol> {
        self.lookup(name)
            .cloned()
            .ok_or_else(|| CompileError::at(span, CompileErrorKind::UnresolvedIdentifier(name)))
    }

    /// Same walk over the type namespace
    pub fn resolve_type(&self, name: InternedSymbol, span: Span) -> CompileResult<Type> {
        self.lookup_type(name)
            .cloned()
            .ok_or_else(|| CompileError::at(span, CompileErrorKind::UnresolvedType(name)))
    }

    /* Fresh name synthesis */

    pub fn next_label(&mut self) -> InternedSymbol {
        let label = InternedSymbol::new(&format!(".L{}", self.label_counter));
        self.label_counter += 1;
        label
    }

    /// Names beginning with `__` are the compiler-temporary naming
    /// convention that escape analysis keys on.
    pub fn temp_name(&mut self, prefix: &str) -> InternedSymbol {
        let name = InternedSymbol::new(&format!("__{}{}", prefix, self.temp_counter));
        self.temp_counter += 1;
        name
    }

    pub fn is_temp_name(name: InternedSymbol) -> bool {
        name.value().starts_with("__")
    }

    /* Method and conformance registries */

    pub fn register_method(
        &mut self,
        struct_name: InternedSymbol,
        method: InternedSymbol,
        mangled: InternedSymbol,
    ) {
        self.methods.insert((struct_name, method), mangled);
    }

    pub fn lookup_method(
        &self,
        struct_name: InternedSymbol,
        method: InternedSymbol,
    ) -> Option<InternedSymbol> {
        self.methods.get(&(struct_name, method)).copied()
    }

    pub fn register_conformance(
        &mut self,
        struct_name: InternedSymbol,
        trait_name: InternedSymbol,
        vtable_instance: InternedSymbol,
    ) {
        self.conformances
            .insert((struct_name, trait_name), vtable_instance);
    }

    pub fn lookup_conformance(
        &self,
        struct_name: InternedSymbol,
        trait_name: InternedSymbol,
    ) -> Option<InternedSymbol> {
        self.conformances.get(&(struct_name, trait_name)).copied()
    }

    pub fn register_trait_object(
        &mut self,
        object_struct: InternedSymbol,
        info: Rc<crate::sema::types::TraitTypeInfo>,
    ) {
        self.trait_objects.insert(object_struct, info);
    }

    /// If the named struct is a synthesized trait object, the trait it
    /// stands in for
    pub fn trait_object_info(
        &self,
        object_struct: InternedSymbol,
    ) -> Option<&Rc<crate::sema::types::TraitTypeInfo>> {
        self.trait_objects.get(&object_struct)
    }

    /* Module memoization */

    pub fn module_already_lowered(&self, name: InternedSymbol) -> bool {
        self.modules_lowered.contains(&name)
    }

    pub fn mark_module_lowered(&mut self, name: InternedSymbol) {
        self.modules_lowered.insert(name);
    }

    /* Lifecycle */

    /// Rewinds scopes and frames so the next pass re-binds from a clean
    /// slate, while keeping the label/temp counters (names must stay unique
    /// across the whole run) and the method/conformance/module registries.
    pub fn begin_pass(&mut self) {
        self.scopes.clear();
        self.frames.raw.truncate(self.static_frame.index() + 1);
        self.frames[self.static_frame].reset();
        self.push_scope(ScopeKind::Block, self.static_frame);
    }

    /// Full reset for an independent recompilation: like `begin_pass` but
    /// counters, caches, and registries are also cleared so the second run
    /// cannot observe offsets or label names from the first.
    pub fn clear_symbols(&mut self) {
        self.label_counter = 0;
        self.temp_counter = 0;
        self.next_scope_index = 0;
        self.modules_lowered.clear();
        self.methods.clear();
        self.conformances.clear();
        self.trait_objects.clear();
        self.begin_pass();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::layout::SixteenBitLayout;

    fn env() -> Env {
        Env::new(Rc::new(SixteenBitLayout))
    }

    fn name(s: &str) -> InternedSymbol {
        InternedSymbol::new(s)
    }

    #[test]
    fn shadowing_resolves_to_the_inner_binding() {
        let mut env = env();

        env.bind(
            name("x"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );
        env.enter_scope(ScopeKind::Block);
        env.bind(
            name("x"),
            Symbol::unbacked(Type::Bool, Visibility::Private, None),
        );

        assert_eq!(env.lookup(name("x")).unwrap().ty, Type::Bool);

        env.exit_scope();
        assert_eq!(env.lookup(name("x")).unwrap().ty, Type::U16);
    }

    #[test]
    fn redefinition_in_the_same_scope_is_detectable() {
        let mut env = env();

        env.bind(
            name("x"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );

        assert!(env.is_locally_bound(name("x")));

        env.enter_scope(ScopeKind::Block);
        assert!(!env.is_locally_bound(name("x")));
    }

    #[test]
    fn resolution_fails_at_the_root() {
        let env = env();

        let error = env.resolve(name("missing"), Span::SYNTHESIZED).unwrap_err();
        assert_eq!(
            error.kind,
            CompileErrorKind::UnresolvedIdentifier(name("missing"))
        );
    }

    #[test]
    fn static_and_automatic_storage_classes() {
        let mut env = env();

        let global = env.bind_with_storage(name("g"), Type::U16, Visibility::Private, None);
        assert_eq!(
            global.storage,
            StorageClass::Static {
                offset: STATIC_STORAGE_BASE
            }
        );

        env.enter_scope(ScopeKind::Function {
            name: name("f"),
            ty: Rc::new(FunctionTypeInfo {
                name: None,
                return_type: Type::Void,
                arguments: vec![],
            }),
        });

        let local = env.bind_with_storage(name("a"), Type::U16, Visibility::Private, None);
        assert_eq!(local.storage, StorageClass::Automatic { offset: 2 });
    }

    #[test]
    fn fresh_names_are_unique_across_passes() {
        let mut env = env();

        let first = env.next_label();
        env.begin_pass();
        let second = env.next_label();

        assert_ne!(first, second);
    }

    #[test]
    fn clear_symbols_resets_counters() {
        let mut env = env();

        let first = env.next_label();
        env.clear_symbols();
        let again = env.next_label();

        assert_eq!(first, again);
    }
}
