//! Property tests: a write re-renders exactly the units whose path contains
//! the written path, and nobody when the value does not change.

use pathstore::runtime::{Mounted, Runtime};
use pathstore::{Path, Store};
use proptest::prelude::*;
use serde_json::json;

const SUBSCRIBABLE: [&str; 7] = ["", "a", "b", "a.x", "a.y", "b.x", "b.y"];
const LEAVES: [&str; 4] = ["a.x", "a.y", "b.x", "b.y"];

fn mount_subscriber(runtime: &Runtime, store: &Store, path: Path) -> Mounted {
    let accessor = store.use_store().join(&path);
    runtime.mount(path.to_string(), move || {
        let _ = accessor.get();
    })
}

proptest! {
    #[test]
    fn leaf_writes_rerender_ancestors_only(
        subscriptions in prop::collection::vec(0..SUBSCRIBABLE.len(), 1..8),
        writes in prop::collection::vec((0..LEAVES.len(), 0i64..3), 1..12),
    ) {
        let runtime = Runtime::new();
        let store = Store::with_runtime(
            runtime.clone(),
            json!({"a": {"x": 0, "y": 0}, "b": {"x": 0, "y": 0}}),
        );

        let paths: Vec<Path> = subscriptions.iter().map(|&i| Path::parse(SUBSCRIBABLE[i])).collect();
        let units: Vec<Mounted> = paths
            .iter()
            .map(|path| mount_subscriber(&runtime, &store, path.clone()))
            .collect();
        let mut expected = vec![1usize; units.len()];

        for (leaf, value) in writes {
            let target = Path::parse(LEAVES[leaf]);
            let changed = store.read(&target) != json!(value);

            store.set(&target, json!(value)).unwrap();

            for (i, path) in paths.iter().enumerate() {
                if changed && path.contains(&target) {
                    expected[i] += 1;
                }
            }
            let actual: Vec<usize> = units.iter().map(Mounted::render_count).collect();
            prop_assert_eq!(&actual, &expected);
            prop_assert_eq!(store.read(&target), json!(value));
        }
    }

    #[test]
    fn batched_writes_rerender_each_unit_at_most_once(
        subscriptions in prop::collection::vec(0..SUBSCRIBABLE.len(), 1..8),
        writes in prop::collection::vec((0..LEAVES.len(), 1i64..4), 1..6),
    ) {
        let runtime = Runtime::new();
        let store = Store::with_runtime(
            runtime.clone(),
            json!({"a": {"x": 0, "y": 0}, "b": {"x": 0, "y": 0}}),
        );

        let paths: Vec<Path> = subscriptions.iter().map(|&i| Path::parse(SUBSCRIBABLE[i])).collect();
        let units: Vec<Mounted> = paths
            .iter()
            .map(|path| mount_subscriber(&runtime, &store, path.clone()))
            .collect();

        let before = store.snapshot();
        runtime.batch(|| {
            for (leaf, value) in &writes {
                store.set(&Path::parse(LEAVES[*leaf]), json!(value)).unwrap();
            }
        });
        let after = store.snapshot();

        for (unit, path) in units.iter().zip(&paths) {
            let touched = path.lookup(&before) != path.lookup(&after);
            prop_assert_eq!(unit.render_count(), if touched { 2 } else { 1 });
        }
    }
}
