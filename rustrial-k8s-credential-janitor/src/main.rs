#[macro_use]
extern crate log;

use futures::future::{join_all, try_join_all};
use gitea::GiteaClient;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use notifier::{ChangeNotifier, DEFAULT_RESYNC_PERIOD};
use opentelemetry::global;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use prometheus_exporter::start_prometheus_metrics_server;
use request_controller::{RequestController, registry};
use rustrial_k8s_credential_janitor_apis::{RequestError, RequestKind};
use std::{collections::HashSet, str::FromStr, sync::Arc, time::Duration};
use tokio::signal::unix::{SignalKind, signal};
use utils::StopSignal;
use work_queue::DEFAULT_QUEUE_CAPACITY;

mod errors;
mod gitea;
mod notifier;
mod prometheus_exporter;
mod request_controller;
mod request_handlers;
mod secret_modifications;
#[cfg(test)]
mod testing;
mod utils;
mod work_queue;

/// The K8s field manager name.
const MANAGER: &'static str = "rustrial-credential-janitor";

const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

struct Configuration {
    client: Client,
    secrets: Api<Secret>,
    watch_namespaces: Option<HashSet<String>>,
    request_kinds: Vec<RequestKind>,
    gitea_host: String,
    gitea_user: String,
    gitea_password: String,
    queue_capacity: usize,
    resync_period: Duration,
    cache_sync_timeout: Duration,
}

impl Configuration {
    pub fn new(client: Client) -> anyhow::Result<Self> {
        let watch_namespaces = parse_namespaces(env_var("WATCH_NAMESPACES"));
        let mut tmp = watch_namespaces.iter().flatten();
        let secrets = if let (Some(ns), None) = (tmp.next(), tmp.next()) {
            // Optimize for the use-case where exactly one watch-namespace is provided.
            info!("Controller is only watching requests in namespace {}", ns);
            Api::<Secret>::namespaced(client.clone(), ns.as_str())
        } else {
            if let Some(namespaces) = &watch_namespaces {
                let namespaces: Vec<&str> = namespaces.iter().map(|v| v.as_str()).collect();
                info!(
                    "Controller is watching requests in namespaces: {}",
                    namespaces.join(",")
                );
            } else {
                info!("Controller is watching requests in all namespaces");
            }
            Api::<Secret>::all(client.clone())
        };
        Ok(Configuration {
            client,
            secrets,
            watch_namespaces,
            request_kinds: parse_kinds(env_var("REQUEST_KINDS"))?,
            gitea_host: required_env_var("GITEA_HOST")?,
            gitea_user: required_env_var("GITEA_USER")?,
            gitea_password: required_env_var("GITEA_PASSWORD")?,
            queue_capacity: parse_env_var("QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            resync_period: Duration::from_secs(parse_env_var(
                "RESYNC_INTERVAL_SECONDS",
                DEFAULT_RESYNC_PERIOD.as_secs(),
            )?),
            cache_sync_timeout: Duration::from_secs(parse_env_var(
                "CACHE_SYNC_TIMEOUT_SECONDS",
                DEFAULT_CACHE_SYNC_TIMEOUT.as_secs(),
            )?),
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_env_var(name: &str) -> anyhow::Result<String> {
    env_var(name).ok_or_else(|| anyhow::anyhow!("environment variable {} must be set", name))
}

fn parse_env_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(name, env_var(name), default)
}

fn parse_value<T>(name: &str, value: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", v, name, e)),
    }
}

/// `None` (all namespaces) if unset, empty or containing a wildcard.
fn parse_namespaces(value: Option<String>) -> Option<HashSet<String>> {
    fn normalize(hs: HashSet<String>) -> Option<HashSet<String>> {
        if hs.is_empty() || hs.contains("*") || hs.contains("") {
            None
        } else {
            Some(hs)
        }
    }
    value
        .map(|v| normalize(v.split(",").map(|v| v.trim().to_string()).collect()))
        .flatten()
}

/// Enabled request kinds, all of them if unset.
fn parse_kinds(value: Option<String>) -> Result<Vec<RequestKind>, RequestError> {
    match value {
        None => Ok(RequestKind::ALL.to_vec()),
        Some(v) => {
            let mut kinds = v
                .split(",")
                .filter(|v| !v.trim().is_empty())
                .map(RequestKind::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            kinds.sort();
            kinds.dedup();
            Ok(kinds)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
    let metrics_addr = env_var("METRICS_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0".to_string());
    let metrics_port = env_var("METRICS_LISTEN_PORT").unwrap_or_else(|| "9000".to_string());
    let metrics_addr = format!("{}:{}", metrics_addr, metrics_port).parse()?;
    let metrics_registry = Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(metrics_registry.clone())
        .build()?;
    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(meter_provider.clone());
    let mut metrics_server = tokio::spawn(start_prometheus_metrics_server(
        metrics_addr,
        metrics_registry,
    ));

    let client = Client::try_default().await?;
    let configuration = Configuration::new(client)?;
    let gitea = GiteaClient::new(
        &configuration.gitea_host,
        &configuration.gitea_user,
        &configuration.gitea_password,
    )?;
    info!(
        "provisioning credentials on {} as {}",
        configuration.gitea_host, configuration.gitea_user
    );

    let (stop_sender, stop) = StopSignal::new();
    let controllers = registry(Arc::new(gitea), Arc::new(configuration.client.clone()))
        .into_iter()
        .filter(|reconciler| configuration.request_kinds.contains(&reconciler.kind()))
        .map(|reconciler| {
            let notifier = ChangeNotifier::new(
                reconciler.kind(),
                configuration.secrets.clone(),
                configuration.watch_namespaces.clone(),
                configuration.resync_period,
            );
            RequestController::new(reconciler, notifier, configuration.queue_capacity)
        });
    info!("start controllers ...");
    let handles = try_join_all(
        controllers.map(|controller| controller.start(stop.clone(), configuration.cache_sync_timeout)),
    )
    .await?;

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        result = &mut metrics_server => match result {
            Ok(Ok(())) => warn!("metrics server stopped, shutting down"),
            Ok(Err(e)) => error!("metrics server failed, shutting down: {}", e),
            Err(e) => error!("metrics server panicked, shutting down: {}", e),
        },
    };
    stop_sender.send(true)?;
    join_all(handles.into_iter().flatten()).await;
    metrics_server.abort();
    if let Err(e) = meter_provider.shutdown() {
        debug!("meter provider shutdown: {}", e);
    }
    info!("stopped");
    Ok(())
}
