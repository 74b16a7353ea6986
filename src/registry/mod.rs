//! Distributed object registry
//!
//! Owns the network id to object mapping and the type catalog, assigns
//! identifiers and toggles the mutation listeners of registered objects.

mod types;

pub use types::*;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{Diagnostics, SyncError, SyncResult};
use crate::serialize::{
    object_addr, same_object, short_type_name, FieldKind, MutationListener, NetworkList,
    NetworkObject, ObjectRef,
};

/// Side of the connection this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

/// Blocking access to objects and identifiers held by remote peers
pub trait RemoteFetch: Send + Sync {
    /// Fetch a registered object by network id
    fn fetch_object(&self, network_id: &str) -> SyncResult<Option<ObjectRef>>;

    /// Ask the host for a fresh network id for the given short type name
    fn fetch_name(&self, type_name: &str) -> SyncResult<Option<String>>;
}

/// Outcome of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    /// The id was mapped to another instance, which got replaced
    Replaced,
    /// The same instance was already registered under its id
    AlreadyRegistered,
}

struct Entry {
    object: ObjectRef,
    seq: u64,
}

/// Registry of live objects keyed by network id
pub struct Registry {
    role: Role,
    entries: RwLock<HashMap<String, Entry>>,
    seq: AtomicU64,
    next_id: AtomicU64,
    types: TypeCatalog,
    listener: RwLock<Option<Arc<dyn MutationListener>>>,
    remote: RwLock<Option<Weak<dyn RemoteFetch>>>,
    diagnostics: Arc<Diagnostics>,
}

impl Registry {
    pub fn new(role: Role, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            role,
            entries: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            types: TypeCatalog::with_builtins(),
            listener: RwLock::new(None),
            remote: RwLock::new(None),
            diagnostics,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn types(&self) -> &TypeCatalog {
        &self.types
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Connect the registry to the mutation listener installed on
    /// registered objects and to the remote fetch used for id requests.
    pub fn bind(&self, listener: Arc<dyn MutationListener>, remote: Weak<dyn RemoteFetch>) {
        *self.listener.write() = Some(listener);
        *self.remote.write() = Some(remote);
    }

    pub(crate) fn remote(&self) -> Option<Arc<dyn RemoteFetch>> {
        self.remote.read().as_ref().and_then(Weak::upgrade)
    }

    /// Fetch an object from the remote side
    pub fn fetch_object(&self, network_id: &str) -> SyncResult<Option<ObjectRef>> {
        self.remote()
            .ok_or(SyncError::NoRemote)?
            .fetch_object(network_id)
    }

    /// Produce a host side id `<ShortType>_<n>` that is not in use
    pub fn generate_id(&self, type_name: &str) -> String {
        let short = short_type_name(type_name);
        let entries = self.entries.read();
        loop {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let candidate = format!("{}_{}", short, n);
            if !entries.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn assign_id(&self, object: &ObjectRef) -> SyncResult<String> {
        match self.role {
            Role::Host => Ok(self.generate_id(object.type_name())),
            Role::Client => {
                let short = short_type_name(object.type_name());
                let remote = self.remote().ok_or(SyncError::NoRemote)?;
                match remote.fetch_name(short)? {
                    Some(id) if !id.is_empty() => Ok(id),
                    _ => Err(SyncError::IdAssignmentFailed(short.to_string())),
                }
            }
        }
    }

    /// Register an object. An empty id is assigned by the host, or
    /// requested from the host on a client (blocking).
    pub fn register(&self, object: ObjectRef) -> SyncResult<Registration> {
        let identity = object
            .identity()
            .ok_or_else(|| SyncError::NotRegistrable(object.type_name().to_string()))?;

        let mut id = identity.id();
        if id.is_empty() {
            id = self.assign_id(&object)?;
            identity.set_id(id.as_str());
        }
        self.types.describe(object.as_ref());

        let replaced = {
            let mut entries = self.entries.write();
            match entries.get(&id).map(|e| e.object.clone()) {
                Some(current) if same_object(&current, &object) => None,
                old => {
                    let seq = self.seq.fetch_add(1, Ordering::SeqCst);
                    entries.insert(
                        id.clone(),
                        Entry {
                            object: object.clone(),
                            seq,
                        },
                    );
                    Some(old)
                }
            }
        };

        match replaced {
            None => {
                self.diagnostics
                    .notification(format!("Object {} is already registered", id));
                Ok(Registration::AlreadyRegistered)
            }
            Some(Some(old)) => {
                if let Some(old_identity) = old.identity() {
                    old_identity.detach();
                }
                self.attach_listener(&object);
                self.diagnostics.warning(format!(
                    "Network id {} was registered to another {} instance; replaced",
                    id,
                    old.type_name()
                ));
                Ok(Registration::Replaced)
            }
            Some(None) => {
                self.attach_listener(&object);
                tracing::debug!("Registered {} as {}", object.type_name(), id);
                Ok(Registration::Added)
            }
        }
    }

    /// Register an object and every registrable object reachable from it.
    /// Descent stops at objects that were already registered.
    pub fn register_recursive(&self, object: &ObjectRef) -> SyncResult<()> {
        let mut visited = HashSet::new();
        self.register_walk(object, &mut visited, true)
    }

    fn register_walk(
        &self,
        object: &ObjectRef,
        visited: &mut HashSet<usize>,
        top: bool,
    ) -> SyncResult<()> {
        if !visited.insert(object_addr(object)) {
            return Ok(());
        }

        if object.identity().is_some() {
            match self.register(object.clone()) {
                Ok(Registration::AlreadyRegistered) => return Ok(()),
                Ok(_) => {}
                Err(e) if top => return Err(e),
                Err(e) => {
                    self.diagnostics.warning(format!(
                        "Could not register nested {}: {}",
                        object.type_name(),
                        e
                    ));
                    return Ok(());
                }
            }
        }

        for child in children(object) {
            self.register_walk(&child, visited, false)?;
        }
        Ok(())
    }

    /// Detach the listener and remove the object. Returns `true` if the
    /// object was the instance registered under its id.
    pub fn unregister(&self, object: &ObjectRef) -> bool {
        let Some(identity) = object.identity() else {
            return false;
        };
        identity.detach();

        let id = identity.id();
        let mut entries = self.entries.write();
        match entries.get(&id) {
            Some(entry) if same_object(&entry.object, object) => {
                entries.remove(&id);
                tracing::debug!("Unregistered {}", id);
                true
            }
            _ => false,
        }
    }

    /// Unregister an object and every registrable object reachable from it
    pub fn unregister_recursive(&self, object: &ObjectRef) -> usize {
        let mut visited = HashSet::new();
        self.unregister_walk(object, &mut visited)
    }

    fn unregister_walk(&self, object: &ObjectRef, visited: &mut HashSet<usize>) -> usize {
        if !visited.insert(object_addr(object)) {
            return 0;
        }
        let mut removed = usize::from(self.unregister(object));
        for child in children(object) {
            removed += self.unregister_walk(&child, visited);
        }
        removed
    }

    fn attach_listener(&self, object: &ObjectRef) {
        let listener = self.listener.read().clone();
        if let (Some(listener), Some(identity)) = (listener, object.identity()) {
            identity.attach(listener);
        }
    }

    /// Re-attach the listener of a registered object. Returns `true` if the
    /// object is registered and a listener is bound.
    pub fn enable_listener(&self, object: &ObjectRef) -> bool {
        if !self.is_registered(object) || self.listener.read().is_none() {
            return false;
        }
        self.attach_listener(object);
        true
    }

    /// Detach the listener. Returns `true` if one was attached.
    pub fn disable_listener(&self, object: &ObjectRef) -> bool {
        object
            .identity()
            .map(|identity| identity.detach())
            .unwrap_or(false)
    }

    /// Disable listeners until the returned guard is dropped. Only the
    /// listeners this call actually detached are restored, so guards nest.
    pub fn suspend<I>(&self, objects: I) -> ListenerGuard<'_>
    where
        I: IntoIterator<Item = ObjectRef>,
    {
        let objects = objects
            .into_iter()
            .filter(|object| self.disable_listener(object))
            .collect();
        ListenerGuard {
            registry: self,
            objects,
        }
    }

    /// Run `action` with the listeners of `objects` disabled, so local
    /// changes made inside it are not broadcast
    pub fn safe<R>(&self, objects: &[ObjectRef], action: impl FnOnce() -> R) -> R {
        let _guard = self.suspend(objects.iter().cloned());
        action()
    }

    pub fn get(&self, network_id: &str) -> Option<ObjectRef> {
        self.entries
            .read()
            .get(network_id)
            .map(|entry| entry.object.clone())
    }

    pub fn contains(&self, network_id: &str) -> bool {
        self.entries.read().contains_key(network_id)
    }

    /// Whether this exact instance is the one registered under its id
    pub fn is_registered(&self, object: &ObjectRef) -> bool {
        let Some(identity) = object.identity() else {
            return false;
        };
        self.entries
            .read()
            .get(&identity.id())
            .map(|entry| same_object(&entry.object, object))
            .unwrap_or(false)
    }

    /// Earliest registered instance of a type
    pub fn first_of_type(&self, type_name: &str) -> Option<ObjectRef> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.object.type_name() == type_name)
            .min_by_key(|entry| entry.seq)
            .map(|entry| entry.object.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        let entries = self.entries.read();
        let mut ids: Vec<(&String, u64)> = entries.iter().map(|(id, e)| (id, e.seq)).collect();
        ids.sort_by_key(|(_, seq)| *seq);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Detach every listener and drop all objects
    pub fn clear(&self) {
        let entries: Vec<Entry> = self.entries.write().drain().map(|(_, e)| e).collect();
        for entry in &entries {
            if let Some(identity) = entry.object.identity() {
                identity.detach();
            }
        }
        tracing::debug!("Registry cleared ({} objects)", entries.len());
    }
}

/// Restores listeners disabled by [`Registry::suspend`] when dropped
pub struct ListenerGuard<'a> {
    registry: &'a Registry,
    objects: Vec<ObjectRef>,
}

impl ListenerGuard<'_> {
    /// Objects whose listeners this guard disabled
    pub fn suspended(&self) -> &[ObjectRef] {
        &self.objects
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        for object in &self.objects {
            self.registry.enable_listener(object);
        }
    }
}

/// Objects directly reachable from the fields and items of `object`
fn children(object: &ObjectRef) -> Vec<ObjectRef> {
    let mut out = Vec::new();
    for field in object.fields() {
        if field.is_network_id() || field.kind == FieldKind::Items {
            continue;
        }
        if let Some(value) = object.get(&field.name) {
            out.extend(value.objects_in());
        }
    }
    if let Some(list) = object.as_list() {
        for item in list.items() {
            out.extend(item.objects_in());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::{CollectionChange, ObservableList, Record, RecordSchema, Value};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl MutationListener for Recorder {
        fn property_changed(&self, network_id: &str, property: &str) {
            self.0.lock().push(format!("{}.{}", network_id, property));
        }

        fn collection_changed(&self, network_id: &str, _change: &CollectionChange) {
            self.0.lock().push(format!("{}[]", network_id));
        }
    }

    struct FixedNames(Mutex<Vec<String>>);

    impl RemoteFetch for FixedNames {
        fn fetch_object(&self, _network_id: &str) -> SyncResult<Option<ObjectRef>> {
            Ok(None)
        }

        fn fetch_name(&self, _type_name: &str) -> SyncResult<Option<String>> {
            Ok(self.0.lock().pop())
        }
    }

    fn schema() -> Arc<RecordSchema> {
        Arc::new(
            RecordSchema::new("demo.Player")
                .registrable()
                .value("Name", "")
                .value("Friend", Value::Null)
                .observable("Inventory"),
        )
    }

    fn player() -> ObjectRef {
        Arc::new(Record::new(schema()))
    }

    fn registry(role: Role) -> (Registry, Arc<Recorder>) {
        let registry = Registry::new(role, Arc::new(Diagnostics::new()));
        let recorder = Arc::new(Recorder::default());
        let remote: Weak<dyn RemoteFetch> = Weak::<FixedNames>::new();
        registry.bind(recorder.clone(), remote);
        (registry, recorder)
    }

    #[test]
    fn test_host_assigns_sequential_ids() {
        let (registry, _) = registry(Role::Host);
        let a = player();
        let b = player();
        assert_eq!(registry.register(a.clone()).unwrap(), Registration::Added);
        assert_eq!(registry.register(b.clone()).unwrap(), Registration::Added);
        assert_eq!(a.get("NetworkId"), Some(Value::from("Player_1")));
        assert_eq!(b.get("NetworkId"), Some(Value::from("Player_2")));
        assert_eq!(registry.ids(), vec!["Player_1".to_string(), "Player_2".to_string()]);
    }

    #[test]
    fn test_generated_ids_skip_taken_ones() {
        let (registry, _) = registry(Role::Host);
        let taken = player();
        taken.set("NetworkId", Value::from("Player_1")).unwrap();
        registry.register(taken).unwrap();

        let fresh = player();
        registry.register(fresh.clone()).unwrap();
        assert_eq!(fresh.get("NetworkId"), Some(Value::from("Player_2")));
    }

    #[test]
    fn test_client_requests_name() {
        let registry = Registry::new(Role::Client, Arc::new(Diagnostics::new()));
        let names = Arc::new(FixedNames(Mutex::new(vec!["Player_7".to_string()])));
        let remote: Weak<dyn RemoteFetch> = Arc::downgrade(&names) as Weak<dyn RemoteFetch>;
        registry.bind(Arc::new(Recorder::default()), remote);

        let p = player();
        registry.register(p.clone()).unwrap();
        assert_eq!(p.get("NetworkId"), Some(Value::from("Player_7")));

        let err = registry.register(player()).unwrap_err();
        assert!(matches!(err, SyncError::IdAssignmentFailed(ref t) if t == "Player"));
    }

    #[test]
    fn test_same_instance_and_replacement() {
        let (registry, _) = registry(Role::Host);
        let a = player();
        a.set("NetworkId", Value::from("p")).unwrap();
        registry.register(a.clone()).unwrap();
        assert_eq!(registry.register(a.clone()).unwrap(), Registration::AlreadyRegistered);

        let b = player();
        b.set("NetworkId", Value::from("p")).unwrap();
        assert_eq!(registry.register(b.clone()).unwrap(), Registration::Replaced);
        assert!(registry.is_registered(&b));
        assert!(!registry.is_registered(&a));
        assert!(!a.identity().unwrap().is_listening());
        assert!(b.identity().unwrap().is_listening());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_recursive_registration_handles_cycles() {
        let (registry, _) = registry(Role::Host);
        let a = player();
        let b = player();
        a.set("Friend", Value::Object(b.clone())).unwrap();
        b.set("Friend", Value::Object(a.clone())).unwrap();

        let inventory = a.get("Inventory").unwrap().as_object().cloned().unwrap();
        let item = player();
        inventory.as_list().unwrap().push(Value::Object(item.clone())).unwrap();

        registry.register_recursive(&a).unwrap();
        assert!(registry.is_registered(&a));
        assert!(registry.is_registered(&b));
        assert!(registry.is_registered(&inventory));
        assert!(registry.is_registered(&item));
        // three players, each with its own inventory list
        assert_eq!(registry.len(), 6);

        assert_eq!(registry.unregister_recursive(&a), 6);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_listeners_and_safe_block() {
        let (registry, recorder) = registry(Role::Host);
        let p = player();
        registry.register(p.clone()).unwrap();

        p.set("Name", Value::from("Ann")).unwrap();
        assert_eq!(recorder.0.lock().len(), 1);

        registry.safe(&[p.clone()], || {
            p.set("Name", Value::from("Bob")).unwrap();
        });
        assert_eq!(recorder.0.lock().len(), 1);
        assert!(p.identity().unwrap().is_listening());

        p.set("Name", Value::from("Cid")).unwrap();
        assert_eq!(recorder.0.lock().len(), 2);
    }

    #[test]
    fn test_nested_guards_restore_once() {
        let (registry, _) = registry(Role::Host);
        let p = player();
        registry.register(p.clone()).unwrap();

        let outer = registry.suspend([p.clone()]);
        {
            let inner = registry.suspend([p.clone()]);
            assert!(inner.suspended().is_empty());
        }
        assert!(!p.identity().unwrap().is_listening());
        drop(outer);
        assert!(p.identity().unwrap().is_listening());
    }

    #[test]
    fn test_first_of_type_and_clear() {
        let (registry, _) = registry(Role::Host);
        let list: ObjectRef = Arc::new(ObservableList::new());
        let a = player();
        let b = player();
        registry.register(list).unwrap();
        registry.register(a.clone()).unwrap();
        registry.register(b).unwrap();

        let first = registry.first_of_type("demo.Player").unwrap();
        assert!(same_object(&first, &a));
        assert!(registry.first_of_type("demo.Ghost").is_none());

        registry.clear();
        assert!(registry.is_empty());
        assert!(!a.identity().unwrap().is_listening());
    }

    #[test]
    fn test_non_registrable_rejected() {
        let (registry, _) = registry(Role::Host);
        let point: ObjectRef = Arc::new(Record::new(Arc::new(
            RecordSchema::new("demo.Point").value("X", 0i32),
        )));
        assert!(matches!(
            registry.register(point),
            Err(SyncError::NotRegistrable(_))
        ));
    }
}
