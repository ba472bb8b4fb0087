use crate::runtime::UnitId;
use crate::store::Path;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;
use tracing::trace;

pub(crate) type WatchFn = Arc<dyn Fn(&Value) + Send + Sync>;

static NULL: Value = Value::Null;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Subscriber {
    Unit(UnitId),
    Watch(usize),
}

/// Who has to hear about one write.
#[derive(Default)]
pub(crate) struct Affected {
    pub(crate) units: BTreeSet<UnitId>,
    pub(crate) watchers: Vec<(WatchFn, Path)>,
}

impl Affected {
    pub(crate) fn is_empty(&self) -> bool {
        self.units.is_empty() && self.watchers.is_empty()
    }
}

/// Path-keyed subscription table.
///
/// Kept in both directions: path to subscribers for notification, subscriber
/// to paths so a unit's registrations can be dropped in one step.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    by_path: BTreeMap<Path, BTreeSet<Subscriber>>,
    by_subscriber: HashMap<Subscriber, HashSet<Path>>,
    watchers: HashMap<usize, (WatchFn, Path)>,
    next_watch: usize,
}

impl SubscriptionTable {
    /// Register `subscriber` at `path`. Returns true if the subscriber had no
    /// registrations before this one.
    pub(crate) fn subscribe(&mut self, subscriber: Subscriber, path: &Path) -> bool {
        let paths = self.by_subscriber.entry(subscriber).or_default();
        let first = paths.is_empty();
        if paths.insert(path.clone()) {
            self.by_path
                .entry(path.clone())
                .or_default()
                .insert(subscriber);
            trace!(?subscriber, path = %path, "subscribe");
        }
        first
    }

    pub(crate) fn add_watcher(&mut self, path: &Path, callback: WatchFn) -> usize {
        let id = self.next_watch;
        self.next_watch += 1;
        self.watchers.insert(id, (callback, path.clone()));
        self.subscribe(Subscriber::Watch(id), path);
        id
    }

    /// Drop every registration of `subscriber`.
    pub(crate) fn remove(&mut self, subscriber: Subscriber) {
        if let Subscriber::Watch(id) = subscriber {
            self.watchers.remove(&id);
        }
        let Some(paths) = self.by_subscriber.remove(&subscriber) else {
            return;
        };
        for path in paths {
            if let Some(subscribers) = self.by_path.get_mut(&path) {
                subscribers.remove(&subscriber);
                if subscribers.is_empty() {
                    self.by_path.remove(&path);
                }
            }
        }
        trace!(?subscriber, "unsubscribe");
    }

    pub(crate) fn count(&self, path: &Path) -> usize {
        self.by_path.get(path).map_or(0, BTreeSet::len)
    }

    /// Subscribers to notify after the value at `path` went from `before` to
    /// `after`.
    ///
    /// The path itself and its ancestors always qualify. A descendant
    /// qualifies only if its own sub-value differs between `before` and
    /// `after`. Disjoint paths never do.
    pub(crate) fn affected(&self, path: &Path, before: &Value, after: &Value) -> Affected {
        let mut affected = Affected::default();

        for depth in 0..=path.len() {
            if let Some(subscribers) = self.by_path.get(&path.prefix(depth)) {
                self.collect(subscribers, &mut affected);
            }
        }

        // Descendants sort right after `path`.
        let below = self
            .by_path
            .range((Bound::Excluded(path.clone()), Bound::Unbounded));
        for (descendant, subscribers) in below {
            let Some(relative) = descendant.strip_prefix(path) else {
                break;
            };
            let old = relative.lookup(before).unwrap_or(&NULL);
            let new = relative.lookup(after).unwrap_or(&NULL);
            if old != new {
                self.collect(subscribers, &mut affected);
            }
        }

        affected
    }

    fn collect(&self, subscribers: &BTreeSet<Subscriber>, affected: &mut Affected) {
        for subscriber in subscribers {
            match subscriber {
                Subscriber::Unit(id) => {
                    affected.units.insert(*id);
                }
                Subscriber::Watch(id) => {
                    if let Some((callback, path)) = self.watchers.get(id) {
                        affected.watchers.push((Arc::clone(callback), path.clone()));
                    }
                }
            }
        }
    }
}
