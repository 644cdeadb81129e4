use anyhow::Result;
use chop_api::ClickHouseInstallation;
use chop_core::{HostRegistry, WorkQueue};
use chop_parser::naming::INSTALLATION_LABEL;
use chop_parser::ClickHouseManifestGenerator;
use clap::Parser;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, CustomResourceExt, Resource};
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod controller;
mod informer;
mod metrics;
mod reconcile;
mod router;
mod server;
mod status;
mod store;
#[cfg(test)]
mod testing;

use cache::Caches;
use config::{Args, LogFormat};
use controller::{Controller, CONTROLLER_NAME};
use informer::Informer;
use metrics::ControllerMetrics;
use reconcile::Reconciler;
use router::{DependentEvents, EventRouter, InstallationEvents};
use server::ServerState;
use store::Stores;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.crd {
        println!(
            "{}",
            serde_json::to_string_pretty(&ClickHouseInstallation::crd())?
        );
        return Ok(());
    }

    init_tracing(args.log_format);
    info!("Starting chop-controller...");

    let client = Client::try_default().await?;
    let config = args.controller_config();
    let namespace = args.namespace.as_deref();
    match namespace {
        Some(ns) => info!("Watching namespace {}", ns),
        None => info!("Watching all namespaces"),
    }

    // Dependents are only watched when they carry the installation label
    let dependents = watcher::Config::default().labels(INSTALLATION_LABEL);
    let installations = Informer::new(
        api::<ClickHouseInstallation>(&client, namespace),
        watcher::Config::default(),
    );
    let config_maps = Informer::new(api::<ConfigMap>(&client, namespace), dependents.clone());
    let services = Informer::new(api::<Service>(&client, namespace), dependents.clone());
    let stateful_sets = Informer::new(api::<StatefulSet>(&client, namespace), dependents);

    let caches = Caches {
        installations: Arc::new(installations.cache()),
        config_maps: Arc::new(config_maps.cache()),
        services: Arc::new(services.cache()),
        stateful_sets: Arc::new(stateful_sets.cache()),
    };

    let queue = WorkQueue::new(CONTROLLER_NAME, config.backoff.clone());
    let router = Arc::new(EventRouter::new(
        queue.clone(),
        caches.installations.clone(),
    ));

    tokio::spawn(installations.run(InstallationEvents(router.clone())));
    tokio::spawn(config_maps.run(DependentEvents(router.clone())));
    tokio::spawn(services.run(DependentEvents(router.clone())));
    tokio::spawn(stateful_sets.run(DependentEvents(router)));

    let registry = HostRegistry::new();
    let reconciler = Reconciler::new(
        caches.clone(),
        Stores::from_client(client),
        Arc::new(ClickHouseManifestGenerator::new(args.default_image.clone())),
        Arc::new(registry.clone()),
    );

    let metrics = ControllerMetrics::new()?;
    let controller = Arc::new(Controller::new(
        queue,
        reconciler,
        caches,
        metrics.clone(),
        config,
    ));

    let state = ServerState {
        metrics,
        registry,
        ready: controller.readiness(),
    };
    let metrics_addr = args.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = server::serve(metrics_addr, state).await {
            error!("Metrics server error: {}", e);
        }
    });

    controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received, exiting...");
        })
        .await?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}
