//! Optional hierarchical diagnostics trace: per-mesh, per-shape records of
//! what was considered and what won, serialized to one JSON document at the
//! end of the run. Disabled runs pay only an atomic load per insert.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::{Map, Value};

#[derive(Default)]
pub struct Diag {
    enabled: AtomicBool,
    root: Mutex<Map<String, Value>>,
}

impl Diag {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            root: Mutex::new(Map::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Inserts `value` at `path` (a `/`-separated key chain), creating
    /// intermediate objects on the way down.
    pub fn insert(&self, path: &[&str], value: Value) {
        if !self.is_enabled() || path.is_empty() {
            return;
        }

        let mut root = self.root.lock().unwrap_or_else(|e| e.into_inner());
        let mut current = &mut *root;
        for key in &path[..path.len() - 1] {
            let slot = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = slot.as_object_mut().expect("just ensured object");
        }
        current.insert(path[path.len() - 1].to_string(), value);
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.root.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_insertion() {
        let diag = Diag::new(true);
        diag.insert(&["meshes", "meshes\\a.nif", "shapes", "0", "winner"], json!("Parallax"));
        diag.insert(&["meshes", "meshes\\a.nif", "mod"], json!("Some Mod"));

        let root = diag.to_json();
        assert_eq!(root["meshes"]["meshes\\a.nif"]["shapes"]["0"]["winner"], json!("Parallax"));
        assert_eq!(root["meshes"]["meshes\\a.nif"]["mod"], json!("Some Mod"));
    }

    #[test]
    fn disabled_diag_records_nothing() {
        let diag = Diag::new(false);
        diag.insert(&["meshes"], json!({}));
        assert_eq!(diag.to_json(), json!({}));
    }
}
