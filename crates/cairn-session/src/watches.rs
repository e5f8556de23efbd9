//! Watch expressions re-evaluated on every frame activation

use cairn_core::Variable;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Watch {
    pub id: u64,
    pub expression: String,
    /// Result in the active frame; `None` until evaluated or after a reset.
    pub value: Option<Variable>,
}

#[derive(Debug, Clone)]
pub struct WatchList {
    entries: Vec<Watch>,
    next_id: u64,
}

impl Default for WatchList {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an expression; an existing identical expression is reused.
    pub fn add(&mut self, expression: &str) -> u64 {
        let expression = expression.trim();
        if let Some(existing) = self.entries.iter().find(|w| w.expression == expression) {
            return existing.id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Watch {
            id,
            expression: expression.to_string(),
            value: None,
        });
        id
    }

    pub fn remove(&mut self, id: u64) -> Option<Watch> {
        let index = self.entries.iter().position(|w| w.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, id: u64) -> Option<&Watch> {
        self.entries.iter().find(|w| w.id == id)
    }

    pub fn set_value(&mut self, id: u64, value: Variable) {
        if let Some(watch) = self.entries.iter_mut().find(|w| w.id == id) {
            watch.value = Some(value);
        }
    }

    pub fn clear_values(&mut self) {
        for watch in &mut self.entries {
            watch.value = None;
        }
    }

    /// `(id, expression)` pairs in insertion order.
    pub fn expressions(&self) -> Vec<(u64, String)> {
        self.entries
            .iter()
            .map(|w| (w.id, w.expression.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Watch> {
        self.entries.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_dedupes_and_remove() {
        let mut watches = WatchList::new();
        let a = watches.add("count");
        assert_eq!(watches.add(" count "), a);
        let b = watches.add("items.length");
        assert_ne!(a, b);

        watches.set_value(a, Variable::new("count", "3"));
        assert_eq!(watches.get(a).and_then(|w| w.value.as_ref()).map(|v| v.value.as_str()), Some("3"));
        watches.clear_values();
        assert!(watches.get(a).is_some_and(|w| w.value.is_none()));

        assert!(watches.remove(a).is_some());
        assert!(watches.remove(a).is_none());
        assert_eq!(watches.expressions(), vec![(b, "items.length".to_string())]);
    }
}
