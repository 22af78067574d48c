//! State tree reader surface.
//!
//! Read-only view over the committed state of one state URI, for UI and
//! other consumer collaborators. Committed transactions are applied in
//! commit order; subscribers get a reactive value per path that updates
//! whenever a committed transaction touches that path. Eventually
//! consistent: a subscriber may observe a later state directly, never an
//! out-of-order one.

use crate::commit::Transaction;
use crate::patch::Patch;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::debug;

struct Subscription {
    path: Vec<String>,
    sender: watch::Sender<Value>,
}

struct ReaderInner {
    tree: Value,
    subscriptions: Vec<Subscription>,
}

/// Reactive read-only view of a replicated state tree.
pub struct StateReader {
    inner: RwLock<ReaderInner>,
}

impl Default for StateReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StateReader {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ReaderInner {
                tree: json!({}),
                subscriptions: Vec::new(),
            }),
        }
    }

    /// Subscribe to the value at a dotted path, e.g. `streams.<address>`.
    ///
    /// The receiver starts with the current value (Null if the path is
    /// unset) and is updated after every committed transaction that changes
    /// the value at the path.
    pub fn subscribe(&self, path: &str) -> watch::Receiver<Value> {
        let elements: Vec<String> = path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let mut inner = self.inner.write();
        let current = get_path(&inner.tree, &elements);
        let (sender, receiver) = watch::channel(current);
        inner.subscriptions.push(Subscription {
            path: elements,
            sender,
        });
        receiver
    }

    /// Apply a committed transaction's patches, in listed order, then
    /// notify subscribers whose paths changed.
    pub fn apply(&self, tx: &Transaction) {
        let mut inner = self.inner.write();
        for patch in &tx.patches {
            apply_patch(&mut inner.tree, patch);
        }
        debug!(tx_id = %tx.id, patch_count = tx.patches.len(), "Applied transaction to read view");

        let tree = inner.tree.clone();
        inner.subscriptions.retain(|sub| {
            let value = get_path(&tree, &sub.path);
            sub.sender.send_if_modified(|current| {
                if *current == value {
                    false
                } else {
                    *current = value;
                    true
                }
            });
            // Drop subscriptions whose receivers are gone.
            sub.sender.receiver_count() > 0
        });
    }

    /// Current value at a dotted path.
    pub fn get(&self, path: &str) -> Value {
        let elements: Vec<String> = path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        get_path(&self.inner.read().tree, &elements)
    }
}

fn apply_patch(tree: &mut Value, patch: &Patch) {
    let elements: Vec<&str> = patch.path.elements().collect();
    set_path(tree, &elements, patch.value.to_json());
}

fn set_path(tree: &mut Value, elements: &[&str], value: Value) {
    let Some((last, prefix)) = elements.split_last() else {
        *tree = value;
        return;
    };
    let mut node = tree;
    for element in prefix {
        if !node.is_object() {
            *node = json!({});
        }
        node = node
            .as_object_mut()
            .expect("just ensured object")
            .entry(element.to_string())
            .or_insert_with(|| json!({}));
    }
    if !node.is_object() {
        *node = json!({});
    }
    node.as_object_mut()
        .expect("just ensured object")
        .insert(last.to_string(), value);
}

fn get_path(tree: &Value, elements: &[String]) -> Value {
    let mut node = tree;
    for element in elements {
        match node.get(element) {
            Some(next) => node = next,
            None => return Value::Null,
        }
    }
    node.clone()
}
