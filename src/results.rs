//! Generated dataset items and the in-memory collection that owns them.

use crate::plan::GenerationMode;

/// Mode-specific payload of a finished item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultKind {
    Pair {
        start_url: String,
        end_url: String,
        start_prompt: String,
        end_prompt: String,
        action_name: String,
    },
    Image {
        url: String,
        prompt: String,
    },
}

/// A finished dataset item. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultItem {
    /// Zero-padded sequence id, e.g. "0007". Doubles as the export basename.
    pub id: String,
    pub mode: GenerationMode,
    /// Training caption, written to the sidecar `.txt` on export.
    pub text: String,
    pub kind: ResultKind,
}

/// A unit that finished its pipeline but has not been assigned a sequence id
/// yet. Ids are handed out at aggregation time only, so they stay contiguous
/// no matter which units of a window failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResult {
    pub mode: GenerationMode,
    pub text: String,
    pub kind: ResultKind,
}

/// Ordered in-memory result collection. The id counter survives across runs
/// (later runs keep numbering where earlier ones stopped) and resets only on
/// [`ResultStore::clear`].
#[derive(Debug, Default)]
pub struct ResultStore {
    items: Vec<ResultItem>,
    counter: u64,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next sequence id and appends the item. Returns the id.
    pub fn push(&mut self, pending: PendingResult) -> String {
        self.counter += 1;
        let id = format!("{:04}", self.counter);
        self.items.push(ResultItem {
            id: id.clone(),
            mode: pending.mode,
            text: pending.text,
            kind: pending.kind,
        });
        id
    }

    pub fn items(&self) -> &[ResultItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops every item and restarts numbering at 0001.
    pub fn clear(&mut self) {
        self.items.clear();
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(text: &str) -> PendingResult {
        PendingResult {
            mode: GenerationMode::Single,
            text: text.to_string(),
            kind: ResultKind::Image {
                url: format!("https://cdn.example/{text}.png"),
                prompt: text.to_string(),
            },
        }
    }

    #[test]
    fn ids_are_zero_padded_and_contiguous() {
        let mut store = ResultStore::new();
        assert_eq!(store.push(pending("a")), "0001");
        assert_eq!(store.push(pending("b")), "0002");
        assert_eq!(store.push(pending("c")), "0003");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn numbering_continues_across_runs() {
        let mut store = ResultStore::new();
        store.push(pending("run1-a"));
        store.push(pending("run1-b"));
        // Second run appends without clearing.
        assert_eq!(store.push(pending("run2-a")), "0003");
    }

    #[test]
    fn clear_resets_items_and_counter() {
        let mut store = ResultStore::new();
        store.push(pending("a"));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.push(pending("b")), "0001");
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut store = ResultStore::new();
        store.push(pending("first"));
        store.push(pending("second"));
        let texts: Vec<&str> = store.items().iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, ["first", "second"]);
    }

    #[test]
    fn padding_grows_past_four_digits() {
        let mut store = ResultStore::new();
        for _ in 0..9999 {
            store.push(pending("x"));
        }
        assert_eq!(store.push(pending("overflow")), "10000");
    }
}
