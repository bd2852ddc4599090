use crate::crd::Authentication;
use crate::reconcile::auth_status::AuthStatusHandler;
use crate::reconcile::capability::AUTHENTICATION_CRD_NAME;
use crate::reconcile::{COMPONENT_NAME, TARGET_NAMESPACE, reconcile_oidc};

use consolop_k8s_util::types::short_type_name;
use consolop_operator::backoff_reconciler;
use consolop_operator::controller::{
    BackoffContext, Context as ConsolopContext, ControllerId, State, Stores, check_api_queryable,
};
use consolop_operator::crd::{CONFIG_RESOURCE_NAME, Console};
use consolop_operator::error::Error;
use consolop_operator::metrics;
use consolop_operator::metrics::ControllerMetrics;

use std::fmt::Debug;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Resource;
use kube::api::Api;
use kube::client::Client;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{self, Lookup};
use kube::runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use tokio::time::Duration;
use tracing::{debug, error, info, trace};

pub const CONTROLLER_ID: ControllerId = "oidc";

const RELOAD_BUFFER_SIZE: usize = 16;
static AUTH_STATUS_FIELD_MANAGER: &str = "authentications.consolop.rs";

/// Context handed to the reconciler: the shared operator context plus the
/// process-lifetime auth status projector.
pub struct Context {
    pub consolop_ctx: Arc<ConsolopContext>,
    pub auth_status: AuthStatusHandler,
}

impl BackoffContext for Context {
    fn metrics(&self) -> &Arc<ControllerMetrics> {
        BackoffContext::metrics(&*self.consolop_ctx)
    }

    async fn get_backoff(&self, key: &str) -> Duration {
        self.consolop_ctx.get_backoff(key).await
    }

    async fn reset_backoff(&self, key: &str) {
        self.consolop_ctx.reset_backoff(key).await
    }
}

/// Reflects a watched input into its store and funnels apply and delete events
/// into the reload channel: none of the watched inputs carry owner references
/// to the Authentication, so store updates alone would never re-trigger a
/// pass.
fn create_watcher<K>(
    api: Api<K>,
    config: watcher::Config,
    writer: Writer<K>,
    reload_tx: mpsc::Sender<()>,
    ctx: Arc<Context>,
) -> BoxFuture<'static, ()>
where
    K: Resource + Lookup + Clone + DeserializeOwned + Send + Sync + Debug + 'static,
    <K as Lookup>::DynamicType: Default + Eq + std::hash::Hash + Clone + Send + Sync,
    <K as Resource>::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let resource_name = short_type_name::<K>().unwrap_or("Unknown");

    watcher(api, config)
        .default_backoff()
        .reflect(writer)
        .for_each(move |res| {
            let mut reload_tx = reload_tx.clone();
            let ctx = ctx.clone();
            async move {
                match res {
                    Ok(event) => {
                        trace!(msg = "watched event", ?event);
                        let action = match &event {
                            watcher::Event::Apply(_) => Some(metrics::Action::Apply),
                            watcher::Event::Delete(_) => Some(metrics::Action::Delete),
                            _ => None,
                        };
                        if let Some(action) = action {
                            debug!(msg = format!(
                                "{} event for {resource_name} triggers reconcile",
                                action.as_str()
                            ));
                            let _ignore_errors = reload_tx.try_send(()).map_err(
                                |e| error!(msg = "failed to trigger reconcile", %e),
                            );
                            ctx.consolop_ctx.metrics.triggered_inc(action, resource_name);
                        }
                    }
                    Err(e) => {
                        error!(msg = format!("unexpected error when watching {resource_name}"), %e);
                        ctx.consolop_ctx.metrics.watch_operations_failed_inc();
                    }
                }
            }
        })
        .boxed()
}

/// Initialize the OIDC setup controller and its watched inputs
pub async fn run(state: State, client: Client) {
    let authentication =
        check_api_queryable(Api::<Authentication>::all(client.clone())).await;
    let console = check_api_queryable(Api::<Console>::all(client.clone())).await;
    let authn_crd =
        check_api_queryable(Api::<CustomResourceDefinition>::all(client.clone())).await;
    let secret =
        check_api_queryable(Api::<Secret>::namespaced(client.clone(), TARGET_NAMESPACE)).await;
    let config_map =
        check_api_queryable(Api::<ConfigMap>::namespaced(client.clone(), TARGET_NAMESPACE)).await;
    let deployment =
        check_api_queryable(Api::<Deployment>::namespaced(client.clone(), TARGET_NAMESPACE)).await;

    let (console_store, console_writer) = reflector::store::<Console>();
    let (crd_store, crd_writer) = reflector::store::<CustomResourceDefinition>();
    let (secret_store, secret_writer) = reflector::store::<Secret>();
    let (config_map_store, config_map_writer) = reflector::store::<ConfigMap>();
    let (deployment_store, deployment_writer) = reflector::store::<Deployment>();
    let (authn_store, authn_writer) = reflector::store::<Authentication>();

    let (reload_tx, reload_rx) = mpsc::channel(RELOAD_BUFFER_SIZE);

    let stores = Stores::new(
        Some(console_store),
        Some(crd_store),
        Some(secret_store),
        Some(config_map_store),
        Some(deployment_store),
    );

    let ctx = Arc::new(Context {
        consolop_ctx: state.to_context(client, CONTROLLER_ID, stores),
        auth_status: AuthStatusHandler::new(
            COMPONENT_NAME,
            TARGET_NAMESPACE,
            AUTH_STATUS_FIELD_MANAGER,
        ),
    });

    let console_watcher = create_watcher(
        console,
        watcher::Config::default().fields(&format!("metadata.name={CONFIG_RESOURCE_NAME}")),
        console_writer,
        reload_tx.clone(),
        ctx.clone(),
    );
    let crd_watcher = create_watcher(
        authn_crd,
        watcher::Config::default().fields(&format!("metadata.name={AUTHENTICATION_CRD_NAME}")),
        crd_writer,
        reload_tx.clone(),
        ctx.clone(),
    );
    let secret_watcher = create_watcher(
        secret,
        watcher::Config::default(),
        secret_writer,
        reload_tx.clone(),
        ctx.clone(),
    );
    let config_map_watcher = create_watcher(
        config_map,
        watcher::Config::default(),
        config_map_writer,
        reload_tx.clone(),
        ctx.clone(),
    );
    let deployment_watcher = create_watcher(
        deployment,
        watcher::Config::default(),
        deployment_writer,
        reload_tx,
        ctx.clone(),
    );

    info!(msg = format!("starting {CONTROLLER_ID} controller"));
    // TODO: watcher::Config::default().streaming_lists() when stabilized in K8s
    // https://kubernetes.io/docs/reference/using-api/api-concepts/#streaming-lists
    let authn_watcher = watcher(
        authentication,
        watcher::Config::default()
            .fields(&format!("metadata.name={CONFIG_RESOURCE_NAME}"))
            .any_semantic(),
    )
    .default_backoff()
    .reflect(authn_writer)
    .touched_objects();

    let oidc_controller = Controller::for_stream(authn_watcher, authn_store)
        // debounce to filter out reconcile calls that happen in quick succession (only taking the latest)
        .with_config(controller::Config::default().debounce(Duration::from_millis(500)))
        .reconcile_all_on(reload_rx.map(|_| ()))
        .shutdown_on_signal()
        .run(
            backoff_reconciler!(reconcile_oidc),
            |_obj, _error: &Error, _ctx| unreachable!("errors are handled in the backoff reconciler"),
            ctx.clone(),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    ctx.consolop_ctx.metrics.ready_set(1);
    tokio::select! {
        _ = oidc_controller => {},
        _ = console_watcher => {},
        _ = crd_watcher => {},
        _ = secret_watcher => {},
        _ = config_map_watcher => {},
        _ = deployment_watcher => {},
    }
}
