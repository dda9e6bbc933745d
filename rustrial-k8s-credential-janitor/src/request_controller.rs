use crate::{
    errors::{ControllerError, ExtKubeApiError},
    gitea::CredentialService,
    notifier::{ChangeNotifier, wait_synced},
    request_handlers::{AccessTokenHandler, CredentialHandler, OAuth2AppHandler},
    secret_modifications::{SecretModifications, SecretStore},
    utils::{SecretRef, StopSignal, collect_all, metric_name},
    work_queue::{Dispatcher, WorkQueue, work_queue},
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use log::{Level, debug, info, log};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, Meter},
};
use rustrial_k8s_credential_janitor_apis::{CredentialRequest, RequestKind};
use std::{sync::Arc, time::Instant};
use tokio::{task::JoinHandle, time::Duration};

const REQUEST_CONTROLLER: &'static str = "request_controller";

/// Result of a successful reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reconciled {
    /// The stored processed hash matches the request, nothing was done.
    AlreadyProcessed,
    /// A credential was (re)created and written to the request `Secret`.
    Provisioned,
    /// The request `Secret` was deleted after it was queued.
    Gone,
}

impl Reconciled {
    fn as_str(&self) -> &'static str {
        match self {
            Reconciled::AlreadyProcessed => "already_processed",
            Reconciled::Provisioned => "provisioned",
            Reconciled::Gone => "gone",
        }
    }
}

/// Reconcile one request `Secret` of a single [`RequestKind`].
#[async_trait]
pub(crate) trait ReconcileRequest: Send + Sync {
    fn kind(&self) -> RequestKind;

    async fn reconcile(&self, secret: &Secret) -> Result<Reconciled, ControllerError>;
}

/// Drives a [`CredentialHandler`] to the state requested by a `Secret`.
///
/// The delivered object only identifies the request. Every pass starts from the version
/// currently stored in the cluster, so a queued duplicate sees the processed hash written
/// by the pass before it.
///
/// An existing credential with the requested name is deleted and created again rather
/// than updated. The processed hash is only written together with the new credential,
/// so any failure leaves the object eligible for a complete retry on its next delivery.
/// A failed write-back after a successful creation therefore leaves an orphaned
/// credential behind, which the retry reclaims by name.
pub(crate) struct Reconciler<H> {
    handler: H,
    secrets: Arc<dyn SecretStore>,
}

impl<H: CredentialHandler> Reconciler<H> {
    pub fn new(handler: H, secrets: Arc<dyn SecretStore>) -> Self {
        Self { handler, secrets }
    }
}

#[async_trait]
impl<H: CredentialHandler> ReconcileRequest for Reconciler<H> {
    fn kind(&self) -> RequestKind {
        H::Request::KIND
    }

    async fn reconcile(&self, secret: &Secret) -> Result<Reconciled, ControllerError> {
        let kind = H::Request::KIND;
        let id = SecretRef::from(secret);
        let latest = match self.secrets.get(&id).await? {
            Some(latest) => latest,
            None => {
                info!("{} request secret {} no longer exists, skipping", kind, id);
                return Ok(Reconciled::Gone);
            }
        };
        let mut modifications = SecretModifications::new(latest);
        info!("handling {} request for secret {}", kind, id);

        let request = H::Request::from_annotations(modifications.annotations())?;
        let fingerprint = request.fingerprint();
        if modifications.processed_hash() == Some(fingerprint.as_str()) {
            info!("{} request for secret {} is already processed, skipping", kind, id);
            return Ok(Reconciled::AlreadyProcessed);
        }

        debug!("checking for existing {} named {}", kind, request.name());
        let handler = &self.handler;
        let existing = collect_all(move |page| handler.list(page)).await?;
        for credential in existing
            .iter()
            .filter(|c| H::credential_name(c) == request.name())
        {
            info!(
                "{} {} already exists, recreating it with the requested properties",
                kind,
                request.name()
            );
            handler.delete(credential).await?;
        }

        info!("creating {} {} for secret {}", kind, request.name(), id);
        let credential = handler.create(&request).await?;
        for (key, value) in H::secret_data(&request, credential) {
            debug!("storing {} secret material in '$.data.{}' of {}", kind, key, id);
            modifications.insert_data(key, value);
        }
        modifications.set_processed_hash(fingerprint);
        modifications.replace(self.secrets.as_ref()).await?;
        info!("updated secret {}", id);
        Ok(Reconciled::Provisioned)
    }
}

/// The fixed set of request kinds this controller knows how to provision.
pub(crate) fn registry(
    gitea: Arc<dyn CredentialService>,
    secrets: Arc<dyn SecretStore>,
) -> Vec<Arc<dyn ReconcileRequest>> {
    vec![
        Arc::new(Reconciler::new(
            AccessTokenHandler::new(gitea.clone()),
            secrets.clone(),
        )),
        Arc::new(Reconciler::new(OAuth2AppHandler::new(gitea), secrets)),
    ]
}

struct WorkerMetrics {
    reconcile_count: Counter<u64>,
    reconcile_duration: Histogram<u64>,
}

impl WorkerMetrics {
    fn new() -> Self {
        let meter: Meter = global::meter(REQUEST_CONTROLLER);
        let reconcile_count = meter
            .u64_counter(metric_name("reconcile_count"))
            .with_description("Count of credential request reconcile invocations")
            .build();
        let reconcile_duration = meter
            .u64_histogram(metric_name("reconcile_duration_ms"))
            .with_description("Reconcile duration of credential requests in milliseconds")
            .with_unit("ms")
            .build();
        Self {
            reconcile_count,
            reconcile_duration,
        }
    }
}

/// Single consumer of a kind's [`WorkQueue`]. Objects are reconciled one at a time in
/// delivery order; a reconciliation in flight is completed before `stop` is honoured.
pub(crate) async fn run_worker(
    reconciler: Arc<dyn ReconcileRequest>,
    mut queue: WorkQueue,
    mut stop: StopSignal,
) {
    let kind = queue.kind();
    let metrics = WorkerMetrics::new();
    info!("starting {} request worker", kind);
    while let Some(secret) = queue.next(&mut stop).await {
        let id = SecretRef::from(secret.as_ref());
        let start = Instant::now();
        let result = match reconciler.reconcile(secret.as_ref()).await {
            Ok(reconciled) => reconciled.as_str(),
            Err(e) => {
                log!(
                    failure_level(&e),
                    "error handling {} request {}: {}",
                    kind,
                    id,
                    e
                );
                e.reason()
            }
        };
        let duration = Instant::now() - start;
        metrics.reconcile_count.add(
            1,
            &[
                KeyValue::new("kind", kind.as_str()),
                KeyValue::new("result", result),
            ],
        );
        metrics.reconcile_duration.record(
            duration.as_millis() as u64,
            &[KeyValue::new("kind", kind.as_str())],
        );
    }
    info!("stopped {} request worker", kind);
}

/// Permanent failures are warnings. Conflicts and vanished objects resolve on redelivery.
fn failure_level(e: &ControllerError) -> Level {
    match e {
        e if !e.is_temporary() => Level::Warn,
        ControllerError::KubeApi(k) if k.is_conflict() || k.is_not_found() => Level::Info,
        _ => Level::Error,
    }
}

/// Notifier, work queue and worker of one request kind.
pub(crate) struct RequestController {
    reconciler: Arc<dyn ReconcileRequest>,
    notifier: ChangeNotifier,
    dispatcher: Dispatcher,
    queue: WorkQueue,
}

impl RequestController {
    pub fn new(
        reconciler: Arc<dyn ReconcileRequest>,
        notifier: ChangeNotifier,
        queue_capacity: usize,
    ) -> Self {
        let (dispatcher, queue) = work_queue(reconciler.kind(), queue_capacity);
        Self {
            reconciler,
            notifier,
            dispatcher,
            queue,
        }
    }

    /// Start worker and watch, then wait for the initial listing to be mirrored.
    pub async fn start(
        self,
        stop: StopSignal,
        sync_timeout: Duration,
    ) -> Result<Vec<JoinHandle<()>>, ControllerError> {
        let kind = self.reconciler.kind();
        let store = self.notifier.reader();
        let worker = tokio::spawn(run_worker(self.reconciler, self.queue, stop.clone()));
        let watch = self.notifier.start(self.dispatcher, stop.clone());
        wait_synced(kind, store, stop, sync_timeout).await?;
        Ok(vec![worker, watch])
    }
}
