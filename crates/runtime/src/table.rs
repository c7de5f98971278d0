//! Table instances.

use crate::externref::ExternRef;
use crate::vmcontext::VMFuncRef;
use riptide_environ::{Trap, ValType};

/// One element of a table.
#[derive(Clone, Debug)]
pub enum TableElement {
    /// A `funcref`; null is represented by a null pointer.
    FuncRef(*mut VMFuncRef),
    /// An `externref`; null is represented by `None`.
    ExternRef(Option<ExternRef>),
}

// The funcref pointers stored here point into instance allocations that
// the store keeps alive for as long as any table can reach them.
unsafe impl Send for TableElement {}
unsafe impl Sync for TableElement {}

enum Elements {
    FuncRefs(Vec<*mut VMFuncRef>),
    ExternRefs(Vec<Option<ExternRef>>),
}

/// A table instance.
pub struct Table {
    elements: Elements,
    maximum: Option<u32>,
}

// See `TableElement`.
unsafe impl Send for Table {}
unsafe impl Sync for Table {}

impl Table {
    /// Creates a table for the given declaration, filled with nulls.
    pub fn new(plan: &riptide_environ::Table) -> Table {
        let len = plan.minimum as usize;
        let elements = match plan.element {
            ValType::FuncRef => Elements::FuncRefs(vec![std::ptr::null_mut(); len]),
            ValType::ExternRef => Elements::ExternRefs(vec![None; len]),
            ty => unreachable!("validation rejects tables of {ty}"),
        };
        Table { elements, maximum: plan.maximum }
    }

    /// The element type of the table.
    pub fn element_type(&self) -> ValType {
        match &self.elements {
            Elements::FuncRefs(_) => ValType::FuncRef,
            Elements::ExternRefs(_) => ValType::ExternRef,
        }
    }

    /// The current number of elements.
    pub fn size(&self) -> u32 {
        match &self.elements {
            Elements::FuncRefs(v) => v.len() as u32,
            Elements::ExternRefs(v) => v.len() as u32,
        }
    }

    /// Grows the table by `delta` elements initialized to `init`,
    /// returning the previous size, or `None` if the limits do not allow
    /// the growth.
    pub fn grow(&mut self, delta: u32, init: TableElement) -> Option<u32> {
        let old = self.size();
        let new = old.checked_add(delta)?;
        if let Some(maximum) = self.maximum {
            if new > maximum {
                return None;
            }
        }
        match (&mut self.elements, init) {
            (Elements::FuncRefs(v), TableElement::FuncRef(init)) => {
                v.resize(new as usize, init)
            }
            (Elements::ExternRefs(v), TableElement::ExternRef(init)) => {
                v.resize(new as usize, init)
            }
            _ => unreachable!("validation matches element types"),
        }
        Some(old)
    }

    /// Reads the element at `index`.
    pub fn get(&self, index: u32) -> Option<TableElement> {
        match &self.elements {
            Elements::FuncRefs(v) => {
                v.get(index as usize).map(|&f| TableElement::FuncRef(f))
            }
            Elements::ExternRefs(v) => {
                v.get(index as usize).map(|e| TableElement::ExternRef(e.clone()))
            }
        }
    }

    /// Reads the element at `index` of a funcref table, for
    /// `call_indirect`.
    pub fn get_funcref(&self, index: u32) -> Option<*mut VMFuncRef> {
        match &self.elements {
            Elements::FuncRefs(v) => v.get(index as usize).copied(),
            Elements::ExternRefs(_) => None,
        }
    }

    /// Writes the element at `index`.
    pub fn set(&mut self, index: u32, elem: TableElement) -> Result<(), Trap> {
        match (&mut self.elements, elem) {
            (Elements::FuncRefs(v), TableElement::FuncRef(f)) => {
                *v.get_mut(index as usize).ok_or(Trap::TableOutOfBounds)? = f;
            }
            (Elements::ExternRefs(v), TableElement::ExternRef(e)) => {
                *v.get_mut(index as usize).ok_or(Trap::TableOutOfBounds)? = e;
            }
            _ => unreachable!("validation matches element types"),
        }
        Ok(())
    }

    /// Fills `[dst, dst + len)` with `val`, per `table.fill`.
    pub fn fill(&mut self, dst: u32, val: TableElement, len: u32) -> Result<(), Trap> {
        let end = dst.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        if end > self.size() {
            return Err(Trap::TableOutOfBounds);
        }
        let (dst, end) = (dst as usize, end as usize);
        match (&mut self.elements, val) {
            (Elements::FuncRefs(v), TableElement::FuncRef(f)) => {
                v[dst..end].fill(f);
            }
            (Elements::ExternRefs(v), TableElement::ExternRef(e)) => {
                v[dst..end].fill(e);
            }
            _ => unreachable!("validation matches element types"),
        }
        Ok(())
    }

    /// Copies `len` elements from `src` to `dst` within this table,
    /// handling overlap, per same-table `table.copy`.
    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        let src_end = src.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        let dst_end = dst.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        if src_end > self.size() || dst_end > self.size() {
            return Err(Trap::TableOutOfBounds);
        }
        let (src, dst, len) = (src as usize, dst as usize, len as usize);
        match &mut self.elements {
            Elements::FuncRefs(v) => v.copy_within(src..src + len, dst),
            Elements::ExternRefs(v) => {
                // Clone-based rotation to respect overlap.
                let copied: Vec<_> = v[src..src + len].to_vec();
                v[dst..dst + len].clone_from_slice(&copied);
            }
        }
        Ok(())
    }

    /// Copies `len` elements between two distinct tables.
    pub fn copy_between(
        dst_table: &mut Table,
        src_table: &Table,
        dst: u32,
        src: u32,
        len: u32,
    ) -> Result<(), Trap> {
        let src_end = src.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        let dst_end = dst.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        if src_end > src_table.size() || dst_end > dst_table.size() {
            return Err(Trap::TableOutOfBounds);
        }
        let (src, dst, len) = (src as usize, dst as usize, len as usize);
        match (&mut dst_table.elements, &src_table.elements) {
            (Elements::FuncRefs(d), Elements::FuncRefs(s)) => {
                d[dst..dst + len].copy_from_slice(&s[src..src + len]);
            }
            (Elements::ExternRefs(d), Elements::ExternRefs(s)) => {
                d[dst..dst + len].clone_from_slice(&s[src..src + len]);
            }
            _ => unreachable!("validation matches element types"),
        }
        Ok(())
    }

    /// Writes a run of funcrefs starting at `dst`, used when applying
    /// element segments. Bounds were pre-checked during instantiation.
    pub fn init_funcrefs(&mut self, dst: u32, items: &[*mut VMFuncRef]) -> Result<(), Trap> {
        let end = (dst as usize)
            .checked_add(items.len())
            .ok_or(Trap::TableOutOfBounds)?;
        match &mut self.elements {
            Elements::FuncRefs(v) => {
                if end > v.len() {
                    return Err(Trap::TableOutOfBounds);
                }
                v[dst as usize..end].copy_from_slice(items);
                Ok(())
            }
            Elements::ExternRefs(_) => Err(Trap::TableOutOfBounds),
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("element", &self.element_type())
            .field("size", &self.size())
            .field("maximum", &self.maximum)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funcref_table(minimum: u32, maximum: Option<u32>) -> Table {
        Table::new(&riptide_environ::Table {
            element: ValType::FuncRef,
            minimum,
            maximum,
        })
    }

    #[test]
    fn grow_respects_maximum() {
        let mut table = funcref_table(1, Some(2));
        assert_eq!(table.grow(1, TableElement::FuncRef(std::ptr::null_mut())), Some(1));
        assert_eq!(table.grow(1, TableElement::FuncRef(std::ptr::null_mut())), None);
        assert_eq!(table.size(), 2);
    }

    #[test]
    fn fill_and_copy_bounds() {
        let mut table = funcref_table(4, None);
        let marker = 0x1000 as *mut VMFuncRef;
        table.fill(1, TableElement::FuncRef(marker), 2).unwrap();
        assert!(matches!(table.get(1), Some(TableElement::FuncRef(p)) if p == marker));
        assert!(matches!(table.get(3), Some(TableElement::FuncRef(p)) if p.is_null()));
        assert_eq!(
            table.fill(3, TableElement::FuncRef(marker), 2),
            Err(Trap::TableOutOfBounds)
        );

        table.copy_within(2, 0, 2).unwrap();
        assert!(matches!(table.get(3), Some(TableElement::FuncRef(p)) if p == marker));
        assert_eq!(table.copy_within(3, 0, 2), Err(Trap::TableOutOfBounds));
    }

    #[test]
    fn overlapping_copy() {
        let mut table = funcref_table(4, None);
        for i in 0..4 {
            table
                .set(i, TableElement::FuncRef((0x1000 + i as usize) as *mut VMFuncRef))
                .unwrap();
        }
        table.copy_within(1, 0, 3).unwrap();
        for (i, expect) in [0x1000usize, 0x1000, 0x1001, 0x1002].into_iter().enumerate() {
            assert!(
                matches!(table.get(i as u32), Some(TableElement::FuncRef(p)) if p as usize == expect)
            );
        }
    }
}
