//! Watch-driven cache population and event fan-out
//!
//! An informer keeps a reflector store current and reports every change to an
//! [`EventHandler`] as an add, an update carrying the previously cached
//! object, or a delete. Objects that disappear while the watch is re-listing
//! were never observed being deleted; they are reported as tombstones holding
//! the last state the cache knew.

use crate::cache::ReflectorCache;
use chop_core::{Error, ObjectKey, Result};
use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher::{self, watcher, Event};
use kube_runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Final state of an object whose deletion was missed by the watch
#[derive(Clone, Debug)]
pub struct DeletedFinalStateUnknown<K> {
    pub key: String,
    pub obj: Option<Arc<K>>,
}

/// Payload of a delete notification
#[derive(Clone, Debug)]
pub enum DeletedObject<K> {
    Live(Arc<K>),
    Tombstone(DeletedFinalStateUnknown<K>),
}

impl<K> DeletedObject<K> {
    /// The last known state of the deleted object
    pub fn object(&self) -> Result<&Arc<K>> {
        match self {
            DeletedObject::Live(obj) => Ok(obj),
            DeletedObject::Tombstone(tombstone) => tombstone
                .obj
                .as_ref()
                .ok_or_else(|| Error::UnrecognizedEventPayload(tombstone.key.clone())),
        }
    }
}

/// Receiver of informer notifications
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, _obj: Arc<K>) {}

    fn on_update(&self, _old: Arc<K>, _new: Arc<K>) {}

    fn on_delete(&self, _obj: DeletedObject<K>) {}
}

pub struct Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    api: Api<K>,
    config: watcher::Config,
    writer: Writer<K>,
    synced: Arc<AtomicBool>,
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(api: Api<K>, config: watcher::Config) -> Self {
        Self {
            api,
            config,
            writer: Writer::default(),
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read-only view of the store this informer populates
    pub fn cache(&self) -> ReflectorCache<K> {
        ReflectorCache::new(self.writer.as_reader(), self.synced.clone())
    }

    /// Drive the watch until its stream ends
    pub async fn run<H: EventHandler<K>>(self, handler: H) {
        let kind = K::kind(&()).to_string();
        let Informer {
            api,
            config,
            writer,
            synced,
        } = self;

        info!(%kind, "informer started");
        let mut dispatcher = Dispatcher::new(writer, handler);
        let mut stream = watcher(api, config).default_backoff().boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    if dispatcher.apply(event) {
                        synced.store(true, Ordering::Release);
                        debug!(%kind, "cache synced");
                    }
                }
                Err(e) => warn!(%kind, error = %e, "watch stream error"),
            }
        }

        warn!(%kind, "watch stream ended");
    }
}

/// Applies watcher events to the store and notifies the handler
struct Dispatcher<K, H>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    writer: Writer<K>,
    handler: H,
    relisted: Vec<(Option<Arc<K>>, Arc<K>)>,
    seen: HashSet<ObjectRef<K>>,
}

impl<K, H> Dispatcher<K, H>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
    H: EventHandler<K>,
{
    fn new(writer: Writer<K>, handler: H) -> Self {
        Self {
            writer,
            handler,
            relisted: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Returns true when the event completed a (re-)list
    fn apply(&mut self, event: Event<K>) -> bool {
        let reader = self.writer.as_reader();
        match &event {
            Event::Init => {
                self.relisted.clear();
                self.seen.clear();
                self.writer.apply_watcher_event(&event);
                false
            }
            Event::InitApply(obj) => {
                // The readable store keeps the previous list until InitDone
                let obj_ref = ObjectRef::from_obj(obj);
                let old = reader.get(&obj_ref);
                self.seen.insert(obj_ref);
                self.relisted.push((old, Arc::new(obj.clone())));
                self.writer.apply_watcher_event(&event);
                false
            }
            Event::InitDone => {
                let vanished: Vec<Arc<K>> = reader
                    .state()
                    .into_iter()
                    .filter(|obj| !self.seen.contains(&ObjectRef::from_obj(obj.as_ref())))
                    .collect();
                self.writer.apply_watcher_event(&event);

                for obj in vanished {
                    let key = tombstone_key(obj.as_ref());
                    self.handler
                        .on_delete(DeletedObject::Tombstone(DeletedFinalStateUnknown {
                            key,
                            obj: Some(obj),
                        }));
                }
                for (old, new) in self.relisted.drain(..) {
                    match old {
                        Some(old) => self.handler.on_update(old, new),
                        None => self.handler.on_add(new),
                    }
                }
                self.seen.clear();
                true
            }
            Event::Apply(obj) => {
                let old = reader.get(&ObjectRef::from_obj(obj));
                self.writer.apply_watcher_event(&event);
                let new = Arc::new(obj.clone());
                match old {
                    Some(old) => self.handler.on_update(old, new),
                    None => self.handler.on_add(new),
                }
                false
            }
            Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                self.handler
                    .on_delete(DeletedObject::Live(Arc::new(obj.clone())));
                false
            }
        }
    }
}

fn tombstone_key<K: Resource>(obj: &K) -> String {
    ObjectKey::from_meta(obj.meta())
        .map(|key| key.to_string())
        .unwrap_or_else(|_| obj.name_any())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl EventHandler<StatefulSet> for Arc<Recorder> {
        fn on_add(&self, obj: Arc<StatefulSet>) {
            self.events.lock().unwrap().push(format!("add {}", obj.name_any()));
        }

        fn on_update(&self, old: Arc<StatefulSet>, new: Arc<StatefulSet>) {
            self.events.lock().unwrap().push(format!(
                "update {} {}->{}",
                new.name_any(),
                old.resource_version().unwrap_or_default(),
                new.resource_version().unwrap_or_default()
            ));
        }

        fn on_delete(&self, obj: DeletedObject<StatefulSet>) {
            let label = match &obj {
                DeletedObject::Live(o) => format!("delete {}", o.name_any()),
                DeletedObject::Tombstone(ts) => format!("tombstone {}", ts.key),
            };
            self.events.lock().unwrap().push(label);
        }
    }

    fn sts(name: &str, rv: &str) -> StatefulSet {
        let mut sts = StatefulSet::default();
        sts.metadata.name = Some(name.to_string());
        sts.metadata.namespace = Some("ns1".to_string());
        sts.metadata.resource_version = Some(rv.to_string());
        sts
    }

    fn events(recorder: &Recorder) -> Vec<String> {
        recorder.events.lock().unwrap().clone()
    }

    #[test]
    fn test_initial_list_reports_adds_and_syncs() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = Dispatcher::new(Writer::default(), recorder.clone());

        assert!(!dispatcher.apply(Event::Init));
        assert!(!dispatcher.apply(Event::InitApply(sts("a", "1"))));
        assert!(dispatcher.apply(Event::InitDone));

        assert_eq!(events(&recorder), vec!["add a"]);
        assert!(dispatcher.writer.as_reader().get(&ObjectRef::new("a").within("ns1")).is_some());
    }

    #[test]
    fn test_apply_reports_previous_state() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = Dispatcher::new(Writer::default(), recorder.clone());

        dispatcher.apply(Event::Apply(sts("a", "1")));
        dispatcher.apply(Event::Apply(sts("a", "2")));
        dispatcher.apply(Event::Delete(sts("a", "2")));

        assert_eq!(events(&recorder), vec!["add a", "update a 1->2", "delete a"]);
    }

    #[test]
    fn test_relist_turns_vanished_objects_into_tombstones() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = Dispatcher::new(Writer::default(), recorder.clone());

        dispatcher.apply(Event::Init);
        dispatcher.apply(Event::InitApply(sts("a", "1")));
        dispatcher.apply(Event::InitApply(sts("b", "1")));
        dispatcher.apply(Event::InitDone);
        recorder.events.lock().unwrap().clear();

        dispatcher.apply(Event::Init);
        dispatcher.apply(Event::InitApply(sts("a", "3")));
        assert!(dispatcher.apply(Event::InitDone));

        assert_eq!(events(&recorder), vec!["tombstone ns1/b", "update a 1->3"]);
        assert!(dispatcher.writer.as_reader().get(&ObjectRef::new("b").within("ns1")).is_none());
    }

    #[test]
    fn test_tombstone_without_object_is_unrecognized() {
        let deleted: DeletedObject<StatefulSet> =
            DeletedObject::Tombstone(DeletedFinalStateUnknown {
                key: "ns1/a".to_string(),
                obj: None,
            });
        assert!(matches!(
            deleted.object(),
            Err(Error::UnrecognizedEventPayload(_))
        ));
    }
}
