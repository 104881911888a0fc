//! Activation record bookkeeping. A [`Frame`] is the storage region behind
//! one or more nested scopes: the single static frame grows upward from the
//! bottom of the data segment, while each function gets a fresh frame growing
//! downward from the frame pointer to match the call stack layout.

use crate::{index::simple_index, intern::InternedSymbol, sema::symbols::Symbol};

simple_index! {
    /// Identifies a frame within the environment's frame arena
    pub struct FrameId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrowthDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    pub growth_direction: GrowthDirection,
    storage_pointer: usize,
    initial_storage_pointer: usize,
    /// Ordered (name, symbol) pairs attached for layout diagnostics. This is
    /// bookkeeping only; the scope owns the symbols.
    symbols: Vec<(InternedSymbol, Symbol)>,
}

impl Frame {
    pub fn new(growth_direction: GrowthDirection, initial_storage_pointer: usize) -> Self {
        Self {
            growth_direction,
            storage_pointer: initial_storage_pointer,
            initial_storage_pointer,
            symbols: Vec::new(),
        }
    }

    pub fn storage_pointer(&self) -> usize {
        self.storage_pointer
    }

    /// Reserves `size` units of storage and returns the offset of the new
    /// allocation. Downward growth uses pre-increment semantics: the returned
    /// offset is the displacement below the frame pointer, so locals are
    /// addressed as `fp - offset`.
    pub fn allocate(&mut self, size: usize) -> usize {
        match self.growth_direction {
            GrowthDirection::Up => {
                let offset = self.storage_pointer;
                self.storage_pointer += size;
                offset
            }
            GrowthDirection::Down => {
                self.storage_pointer += size;
                self.storage_pointer
            }
        }
    }

    /// Restores the frame to its state at construction. Used when
    /// recompiling from a symbol-cleared syntax tree.
    pub fn reset(&mut self) {
        self.storage_pointer = self.initial_storage_pointer;
        self.symbols.clear();
    }

    pub fn add_symbol(&mut self, name: InternedSymbol, symbol: Symbol) {
        self.symbols.push((name, symbol));
    }

    pub fn symbols(&self) -> &[(InternedSymbol, Symbol)] {
        &self.symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upward_allocation_is_post_increment() {
        let mut frame = Frame::new(GrowthDirection::Up, 0x1000);

        assert_eq!(frame.allocate(2), 0x1000);
        assert_eq!(frame.allocate(4), 0x1002);
        assert_eq!(frame.storage_pointer(), 0x1006);
    }

    #[test]
    fn downward_allocation_is_pre_increment() {
        let mut frame = Frame::new(GrowthDirection::Down, 0);

        assert_eq!(frame.allocate(2), 2);
        assert_eq!(frame.allocate(2), 4);
    }

    #[test]
    fn reset_restores_initial_cursor() {
        let mut frame = Frame::new(GrowthDirection::Up, 16);
        frame.allocate(8);
        assert_ne!(frame.storage_pointer(), 16);

        frame.reset();
        assert_eq!(frame.storage_pointer(), 16);
        assert_eq!(frame, Frame::new(GrowthDirection::Up, 16));
    }
}
