use crate::error::{Result, StoreError};
use crate::store::{Key, Path, Store, Update};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// Whether reading through an accessor subscribes the rendering unit.
pub trait Mode: sealed::Sealed {
    const SUBSCRIBES: bool;
}

/// Reads register the rendering unit for re-render.
#[derive(Clone, Copy, Debug)]
pub enum Subscribe {}

/// Reads register nothing.
#[derive(Clone, Copy, Debug)]
pub enum Peek {}

impl sealed::Sealed for Subscribe {}
impl sealed::Sealed for Peek {}

impl Mode for Subscribe {
    const SUBSCRIBES: bool = true;
}

impl Mode for Peek {
    const SUBSCRIBES: bool = false;
}

/// Subscribing accessor: `get` re-renders the calling unit on later changes.
pub type UseStore = Accessor<Subscribe>;

/// Non-subscribing accessor: same reads and writes, no re-render.
pub type GetStore = Accessor<Peek>;

/// A store handle bound to one path.
///
/// Extend the path with [`at`](Accessor::at) / [`index`](Accessor::index),
/// then call [`get`](Accessor::get) for the value and a setter bound to the
/// same path.
///
/// ```
/// use pathstore::create_store;
/// use serde_json::json;
///
/// let (use_store, get_store) = create_store(json!({"cart": {"price": 0}}));
///
/// let (price, set_price) = get_store.at("cart").at("price").get();
/// assert_eq!(price, json!(0));
/// set_price.update(|v| json!(v.as_i64().unwrap_or(0) + 1)).unwrap();
///
/// let (cart, _) = use_store.at("cart").get();
/// assert_eq!(cart, json!({"price": 1}));
/// ```
pub struct Accessor<M: Mode> {
    store: Store,
    path: Path,
    mode: PhantomData<M>,
}

impl<M: Mode> Accessor<M> {
    pub(crate) fn new(store: Store, path: Path) -> Self {
        Self {
            store,
            path,
            mode: PhantomData,
        }
    }

    /// Accessor for the field (or index, for numeric names) `key` below this
    /// one.
    pub fn at(&self, key: impl Into<Key>) -> Self {
        Self::new(self.store.clone(), self.path.child(key))
    }

    pub fn index(&self, index: usize) -> Self {
        self.at(Key::Index(index))
    }

    /// Accessor for `path` relative to this one.
    pub fn join(&self, path: &Path) -> Self {
        Self::new(self.store.clone(), self.path.join(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The current value at this path (`null` if absent) and its setter.
    pub fn get(&self) -> (Value, Setter) {
        if M::SUBSCRIBES {
            self.store.track(&self.path);
        }
        (self.store.read(&self.path), self.setter())
    }

    /// Like [`get`](Accessor::get), decoding the value into `T`.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<(T, Setter)> {
        let (value, setter) = self.get();
        let value = serde_json::from_value(value).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })?;
        Ok((value, setter))
    }

    /// The setter alone. Never subscribes.
    pub fn setter(&self) -> Setter {
        Setter {
            store: self.store.clone(),
            path: self.path.clone(),
        }
    }

    pub fn subscribing(&self) -> UseStore {
        Accessor::new(self.store.clone(), self.path.clone())
    }

    pub fn peeking(&self) -> GetStore {
        Accessor::new(self.store.clone(), self.path.clone())
    }
}

impl<M: Mode> Clone for Accessor<M> {
    fn clone(&self) -> Self {
        Self::new(self.store.clone(), self.path.clone())
    }
}

impl<M: Mode> fmt::Debug for Accessor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("path", &self.path)
            .field("subscribes", &M::SUBSCRIBES)
            .finish()
    }
}

/// Writes the value at one path of a store.
#[derive(Clone)]
pub struct Setter {
    store: Store,
    path: Path,
}

impl Setter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        self.store.set(&self.path, value)
    }

    /// Replace the value with `f(current)`.
    ///
    /// Not atomic across threads: a concurrent write to the same path between
    /// the read and the store is overwritten (last writer wins).
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Value) -> Value,
    {
        self.store.update(&self.path, f)
    }

    pub fn write(&self, update: Update<'_>) -> Result<()> {
        self.store.write(&self.path, update)
    }

    pub fn set_as<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.store.set_as(&self.path, value)
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixture() -> (Runtime, Store) {
        let runtime = Runtime::new();
        let store = Store::with_runtime(
            runtime.clone(),
            json!({"cart": {"price": 0, "items": []}, "username": "Hamza"}),
        );
        (runtime, store)
    }

    #[test]
    fn accessor_paths_chain() {
        let (_, store) = fixture();
        let items = store.use_store().at("cart").at("items");
        assert_eq!(items.path(), &Path::parse("cart.items"));
        assert_eq!(items.index(2).path(), &Path::parse("cart.items.2"));
        assert_eq!(
            store.get_store().join(&Path::parse("cart.price")).path(),
            &Path::parse("cart.price")
        );
    }

    #[test]
    fn root_get_returns_whole_state() {
        let (_, store) = fixture();
        let (state, set_state) = store.get_store().get();
        assert_eq!(state, store.snapshot());
        assert!(set_state.path().is_root());

        set_state.set(json!({"fresh": true})).unwrap();
        assert_eq!(store.snapshot(), json!({"fresh": true}));
    }

    #[test]
    fn use_store_subscribes_only_inside_render() {
        let (runtime, store) = fixture();
        let price = Path::parse("cart.price");

        let _ = store.use_store().join(&price).get();
        assert_eq!(store.subscriber_count(&price), 0);

        let unit = runtime.mount("price", {
            let use_store = store.use_store();
            move || {
                let _ = use_store.at("cart").at("price").get();
            }
        });
        assert_eq!(store.subscriber_count(&price), 1);

        drop(unit);
        assert_eq!(store.subscriber_count(&price), 0);
    }

    #[test]
    fn get_store_never_subscribes() {
        let (runtime, store) = fixture();
        let renders = Arc::new(AtomicUsize::new(0));
        let unit = runtime.mount("reader", {
            let get_store = store.get_store();
            let renders = renders.clone();
            move || {
                let _ = get_store.at("cart").at("price").get();
                renders.fetch_add(1, Ordering::SeqCst);
            }
        });

        store.get_store().at("cart").at("price").setter().set(json!(5)).unwrap();
        assert_eq!(unit.render_count(), 1);
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_store().at("cart").at("price").get().0, json!(5));
    }

    #[test]
    fn typed_get_and_set() {
        let (_, store) = fixture();
        let name = store.get_store().at("username");

        let (value, set_name): (String, _) = name.get_as().unwrap();
        assert_eq!(value, "Hamza");
        set_name.set_as("HAMZA").unwrap();
        assert_eq!(name.get().0, json!("HAMZA"));

        assert!(name.get_as::<Vec<u8>>().is_err());
    }

    #[test]
    fn modes_convert() {
        let (_, store) = fixture();
        let peek = store.use_store().at("cart").peeking();
        assert_eq!(peek.path(), &Path::parse("cart"));
        assert!(format!("{:?}", peek.subscribing()).contains("subscribes: true"));
    }
}
