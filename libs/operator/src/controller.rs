use crate::crd::Console;
use crate::error::{Error, Result};
use crate::metrics::{ControllerMetrics, Metrics};

use consolop_k8s_util::types::short_type_name;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Resource;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::reflector::Store;
use prometheus_client::registry::Registry;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{error, trace};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

pub type ControllerId = &'static str;

/// State shared between the controllers and the web server
#[derive(Clone)]
pub struct State {
    /// Metrics
    metrics: Arc<Metrics>,
}

/// defines store structs. E.g:
/// ```ignore
/// define_stores!(
///     secret, secret_store => Store<Secret>,
/// );
/// ```
///
/// The above macro invocation generates a `Stores` struct with an optional
/// `secret_store` field plus a `secret()` accessor that expects the store to
/// have been wired at startup.
macro_rules! define_stores {
    ($($accessor:ident, $variant:ident => $store:ident<$type:ty>),* $(,)?) => {
        /// Reflector stores shared with the reconciler; entries stay `None`
        /// until the controller wires its watchers at startup.
        #[derive(Clone, Default)]
        pub struct Stores {
            $(pub $variant: Option<$store<$type>>),*
        }

        impl Stores {
            pub fn new($($variant: Option<$store<$type>>),*) -> Self {
                Stores {
                    $($variant),*
                }
            }

            $(
                pub fn $accessor(&self) -> &$store<$type> {
                    // safe expect: stores are wired before the controller starts
                    self.$variant
                        .as_ref()
                        .expect("store is initialized at startup")
                }
            )*
        }
    }
}

define_stores!(
    console, console_store => Store<Console>,
    crd, crd_store => Store<CustomResourceDefinition>,
    secret, secret_store => Store<Secret>,
    config_map, config_map_store => Store<ConfigMap>,
    deployment, deployment_store => Store<Deployment>,
);

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(registry: Registry, controller_names: &[ControllerId]) -> Self {
        Self {
            metrics: Arc::new(Metrics::new(registry, controller_names)),
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Result<String> {
        let mut buffer = String::new();
        let registry = &*self.metrics.registry;
        prometheus_client::encoding::text::encode(&mut buffer, registry)
            .map_err(Error::FormattingError)?;
        Ok(buffer)
    }

    /// Create a Controller Context that can update State
    pub fn to_context(
        &self,
        client: Client,
        controller_id: ControllerId,
        stores: Stores,
    ) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: self
                .metrics
                .controllers
                .get(controller_id)
                .expect("all CONTROLLER_IDs have to be registered")
                .clone(),
            stores: Arc::new(stores),
            error_backoff_cache: Arc::default(),
        })
    }
}

// Context for our reconcilers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Prometheus metrics
    pub metrics: Arc<ControllerMetrics>,
    /// Shared stores
    pub stores: Arc<Stores>,
    /// State of the error backoff policy per object
    error_backoff_cache: Arc<RwLock<HashMap<String, RwLock<ExponentialBackoff>>>>,
}

#[allow(async_fn_in_trait)]
pub trait BackoffContext {
    fn metrics(&self) -> &Arc<ControllerMetrics>;
    async fn get_backoff(&self, key: &str) -> Duration;
    async fn reset_backoff(&self, key: &str);
}

impl BackoffContext for Context {
    fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    /// Return next duration of the backoff policy for the given object
    async fn get_backoff(&self, key: &str) -> Duration {
        {
            let read_guard = self.error_backoff_cache.read().await;
            if let Some(backoff) = read_guard.get(key) {
                if let Some(duration) = backoff.write().await.next() {
                    return duration;
                }
            }
        }

        // Backoff policy: 1s, 2s, 4s, 8s, 16s, 32s, 60s, 60s...
        let mut backoff = ExponentialBuilder::default()
            .with_max_delay(DEFAULT_RECONCILE_INTERVAL)
            .without_max_times()
            .build();
        // safe unwrap: first backoff is always Some(Duration)
        let duration = backoff.next().unwrap();
        self.error_backoff_cache
            .write()
            .await
            .insert(key.to_string(), RwLock::new(backoff));
        trace!(msg = "recreate backoff policy", key);
        duration
    }

    /// Reset the backoff policy for the given object
    async fn reset_backoff(&self, key: &str) {
        let read_guard = self.error_backoff_cache.read().await;
        if read_guard.get(key).is_some() {
            drop(read_guard);
            trace!(msg = "reset backoff policy", key);
            let mut write_guard = self.error_backoff_cache.write().await;
            write_guard.remove(key);
        }
    }
}

pub async fn check_api_queryable<K>(api: Api<K>) -> Api<K>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!(
            "{} is not queryable; {e:?}. Check controller permissions",
            short_type_name::<K>().unwrap_or("Unknown resource"),
        );
        std::process::exit(1);
    }
    api
}

#[macro_export]
macro_rules! backoff_reconciler {
    ($inner_reconciler:ident) => {
        |obj, ctx| async move {
            use $crate::controller::BackoffContext;
            let name = kube::ResourceExt::name_any(obj.as_ref());
            match $inner_reconciler(obj.clone(), ctx.clone()).await {
                Ok(action) => {
                    ctx.reset_backoff(&name).await;
                    Ok(action)
                }
                Err(error) => {
                    tracing::error!(msg = "failed reconciliation", %name, %error);
                    ctx.metrics().reconcile_failure_inc();
                    let backoff_duration = ctx.get_backoff(&name).await;
                    tracing::trace!(
                        msg = format!("backoff duration: {backoff_duration:?}"),
                        %name,
                    );
                    Ok(kube::runtime::controller::Action::requeue(backoff_duration))
                }
            }
        }
    };
}
