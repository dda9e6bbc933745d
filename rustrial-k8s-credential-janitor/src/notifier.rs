use crate::{
    errors::ControllerError,
    utils::{SecretRef, StopSignal},
    work_queue::Dispatcher,
};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, ResourceExt};
use kube_runtime::{
    WatchStreamExt,
    reflector::{self, Store, store::Writer},
    watcher,
};
use log::{debug, info, warn};
use rustrial_k8s_credential_janitor_apis::RequestKind;
use std::{collections::HashSet, pin::pin, sync::Arc};
use tokio::{
    task::JoinHandle,
    time::{Duration, Instant, interval_at},
};

/// Default period after which all mirrored request objects are dispatched again.
pub(crate) const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(600);

/// Watches the request `Secret`s of one [`RequestKind`], mirrors them in a local store and
/// hands every applied object (and periodically every mirrored object) to a [`Dispatcher`].
///
/// Deliveries are at-least-once and may repeat, consumers re-check every object.
pub(crate) struct ChangeNotifier {
    kind: RequestKind,
    api: Api<Secret>,
    namespaces: Option<HashSet<String>>,
    resync_period: Duration,
    reader: Store<Secret>,
    writer: Writer<Secret>,
}

impl ChangeNotifier {
    /// `namespaces` restricts dispatching to objects in those namespaces, `None` means all.
    pub fn new(
        kind: RequestKind,
        api: Api<Secret>,
        namespaces: Option<HashSet<String>>,
        resync_period: Duration,
    ) -> Self {
        let (reader, writer) = reflector::store();
        Self {
            kind,
            api,
            namespaces,
            resync_period,
            reader,
            writer,
        }
    }

    /// Read handle on the local mirror, used to wait for the initial listing.
    pub fn reader(&self) -> Store<Secret> {
        self.reader.clone()
    }

    /// Spawn the watch and resync loop; it runs until `stop` fires.
    pub fn start(self, dispatcher: Dispatcher, stop: StopSignal) -> JoinHandle<()> {
        let selector = self.kind.label_selector();
        info!("starting {} watch with label selector {}", self.kind, selector);
        let watch = watcher(self.api, watcher::Config::default().labels(selector.as_str()))
            .default_backoff();
        let objects = reflector::reflector(self.writer, watch).applied_objects();
        let filter = NamespaceFilter(self.namespaces);
        tokio::spawn(run(
            self.kind,
            objects,
            self.reader,
            filter,
            dispatcher,
            self.resync_period,
            stop,
        ))
    }
}

/// Block until the initial listing is mirrored. Timing out or being stopped first is fatal.
pub(crate) async fn wait_synced(
    kind: RequestKind,
    store: Store<Secret>,
    mut stop: StopSignal,
    timeout: Duration,
) -> Result<(), ControllerError> {
    tokio::select! {
        ready = tokio::time::timeout(timeout, store.wait_until_ready()) => match ready {
            Ok(Ok(())) => {
                info!("{} request cache synced with {} objects", kind, store.state().len());
                Ok(())
            }
            Ok(Err(e)) => Err(ControllerError::CacheSync(format!(
                "{} request cache writer dropped before sync: {}",
                kind, e
            ))),
            Err(_) => Err(ControllerError::CacheSync(format!(
                "timed out after {:?} waiting for {} request cache to sync",
                timeout, kind
            ))),
        },
        _ = stop.stopped() => Err(ControllerError::CacheSync(format!(
            "stopped while waiting for {} request cache to sync",
            kind
        ))),
    }
}

struct NamespaceFilter(Option<HashSet<String>>);

impl NamespaceFilter {
    fn admits(&self, secret: &Secret) -> bool {
        match &self.0 {
            None => true,
            Some(namespaces) => secret
                .namespace()
                .map_or(false, |ns| namespaces.contains(ns.as_str())),
        }
    }
}

async fn run<S>(
    kind: RequestKind,
    objects: S,
    reader: Store<Secret>,
    filter: NamespaceFilter,
    dispatcher: Dispatcher,
    resync_period: Duration,
    mut stop: StopSignal,
) where
    S: Stream<Item = Result<Secret, watcher::Error>>,
{
    let mut objects = pin!(objects);
    let mut resync = interval_at(Instant::now() + resync_period, resync_period);
    loop {
        tokio::select! {
            _ = stop.stopped() => break,
            next = objects.next() => match next {
                Some(Ok(secret)) => {
                    if filter.admits(&secret) {
                        dispatcher.dispatch(Arc::new(secret));
                    }
                }
                Some(Err(e)) => warn!("{} watch failed: {}", kind, e),
                None => {
                    warn!("{} watch stream ended", kind);
                    break;
                }
            },
            _ = resync.tick() => {
                let objects = reader.state();
                debug!("resyncing {} {} requests", objects.len(), kind);
                for secret in objects.into_iter().filter(|s| filter.admits(s)) {
                    if !dispatcher.dispatch(secret.clone()) {
                        debug!("resync of {} deferred to next period", SecretRef::from(secret.as_ref()));
                    }
                }
            }
        }
    }
    info!("stopped {} watch", kind);
}
