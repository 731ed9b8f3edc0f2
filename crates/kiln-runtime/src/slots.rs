//! Growable, index-addressed argument slot storage.

/// Ordered argument slots, each empty or holding one value.
///
/// The table is always at least `highest touched index + 1` long; slots below
/// that which were never bound stay empty. Replacing or releasing a slot hands
/// the previous occupant back to the caller, so owned device resources are
/// dropped exactly once at a well-defined point.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> SlotTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn grow_to(&mut self, index: usize) {
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
    }

    /// Empty slot `index`, growing the table to cover it. Returns the
    /// previous occupant.
    pub fn release(&mut self, index: usize) -> Option<T> {
        self.grow_to(index);
        self.slots[index].take()
    }

    /// Store `value` at `index`, growing the table to cover it. Returns the
    /// previous occupant.
    pub fn insert(&mut self, index: usize, value: T) -> Option<T> {
        self.grow_to(index);
        self.slots[index].replace(value)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn is_bound(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&T>)> {
        self.slots.iter().enumerate().map(|(i, s)| (i, s.as_ref()))
    }

    /// Drop every occupant in slot order.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            drop(slot.take());
        }
        self.slots.clear();
    }
}

/// Convert a 1-based argument position, as scripting front ends number
/// them, to a slot index.
pub fn slot_from_one_based(position: u32) -> Option<usize> {
    position.checked_sub(1).map(|i| i as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Tracked(Rc<Cell<usize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_binding_high_slot_grows_table() {
        let mut table = SlotTable::new();
        table.insert(5, 42u32);

        assert_eq!(table.len(), 6);
        for i in 0..5 {
            assert!(!table.is_bound(i), "slot {i} should be empty");
        }
        assert_eq!(table.get(5), Some(&42));
        assert_eq!(table.get(6), None);
    }

    #[test]
    fn test_release_grows_and_returns_previous() {
        let mut table = SlotTable::new();
        assert_eq!(table.release(2), None::<u8>);
        assert_eq!(table.len(), 3);

        table.insert(1, 7u8);
        assert_eq!(table.release(1), Some(7));
        assert!(!table.is_bound(1));
    }

    #[test]
    fn test_rebind_drops_previous_once() {
        let drops = Rc::new(Cell::new(0));
        let mut table = SlotTable::new();

        for _ in 0..10 {
            drop(table.insert(3, Tracked(Rc::clone(&drops))));
        }
        // Nine replaced occupants dropped, one still live.
        assert_eq!(drops.get(), 9);
        assert_eq!(table.iter().filter(|(_, s)| s.is_some()).count(), 1);

        table.clear();
        assert_eq!(drops.get(), 10);
        assert!(table.is_empty());
    }

    #[test]
    fn test_shrinking_never_happens() {
        let mut table = SlotTable::new();
        table.insert(4, ());
        table.insert(1, ());
        table.release(4);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_one_based_positions() {
        assert_eq!(slot_from_one_based(1), Some(0));
        assert_eq!(slot_from_one_based(6), Some(5));
        assert_eq!(slot_from_one_based(0), None);
    }
}
