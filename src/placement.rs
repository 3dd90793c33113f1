use crate::models::{Item, Slot};
use std::collections::BTreeMap;

/// Working copy of page occupancy used while deciding slots for new items.
///
/// Built once per reconciliation pass and mutated by every placement so that
/// several new items placed in the same pass never collide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    pages: BTreeMap<u32, Vec<String>>,
}

impl Occupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a Item>) -> Self {
        let mut slots = BTreeMap::<u32, Vec<(u32, &str)>>::new();
        for item in items {
            slots.entry(item.page).or_default().push((item.index, item.id.as_str()));
        }

        let pages = slots
            .into_iter()
            .map(|(page, mut occupants)| {
                occupants.sort();
                let ids = occupants.into_iter().map(|(_, id)| id.to_string()).collect();
                (page, ids)
            })
            .collect();

        Self { pages }
    }

    pub fn occupants(&self, page: u32) -> &[String] {
        self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// First page with room, appending at its end; otherwise a fresh page after the last.
    pub fn first_fit(&self, capacity: usize) -> Slot {
        for (page, occupants) in &self.pages {
            if occupants.len() < capacity {
                return Slot::new(*page, occupants.len() as u32);
            }
        }
        match self.pages.keys().next_back() {
            Some(last) => Slot::new(last + 1, 0),
            None => Slot::new(0, 0),
        }
    }

    pub fn place(&mut self, id: &str, capacity: usize) -> Slot {
        let slot = self.first_fit(capacity);
        self.pages.entry(slot.page).or_default().push(id.to_string());
        slot
    }

    /// Undoes a `place` whose write failed, freeing the slot for the next item.
    pub fn release(&mut self, slot: Slot, id: &str) {
        let Some(occupants) = self.pages.get_mut(&slot.page) else {
            return;
        };
        if occupants.last().map(String::as_str) == Some(id) {
            occupants.pop();
        } else if let Some(position) = occupants.iter().position(|occupant| occupant == id) {
            occupants.remove(position);
        }
        if occupants.is_empty() {
            self.pages.remove(&slot.page);
        }
    }
}
