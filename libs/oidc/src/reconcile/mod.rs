pub mod auth_status;
pub mod capability;
pub mod client_config;
pub mod deployment;

use self::auth_status::AuthStatusHandler;
use self::capability::{AUTHENTICATION_CRD_NAME, authn_crd_has_oidc_clients};
use self::client_config::oidc_client_config;
use self::deployment::{Readiness, check_client_config_status, server_ca_config_name};

use crate::controller::Context;
use crate::crd::{Authentication, AuthenticationType};

use consolop_operator::controller::{DEFAULT_RECONCILE_INTERVAL, Stores};
use consolop_operator::crd::{CONFIG_RESOURCE_NAME, ManagementState};
use consolop_operator::error::{Error, Result};
use consolop_operator::status::{StatusHandler, progressing_or_degraded};

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use tokio::time::Duration;
use tracing::{debug, info, instrument};

pub const TARGET_NAMESPACE: &str = "console";
pub const COMPONENT_NAME: &str = "console";
pub const CONSOLE_DEPLOYMENT_NAME: &str = "console";
pub const CLIENT_SECRET_NAME: &str = "console-oidc-client";

pub const COND_OIDC_CLIENT_CONFIG: &str = "OIDCClientConfig";
pub const COND_AUTH_STATUS_HANDLER: &str = "AuthStatusHandler";

/// Condition-type prefixes this controller owns on the Console status. Every
/// branch that skips their governing check resets them through
/// [`reset_owned_conditions`] instead of leaving stale state behind.
const OWNED_CONDITION_PREFIXES: [&str; 2] = [COND_OIDC_CLIENT_CONFIG, COND_AUTH_STATUS_HANDLER];

static REASON_SYNC_FAILED: &str = "OIDCConfigSyncFailed";
static REASON_FAILED_APPLY: &str = "FailedApply";

/// Expedited retry after a pass that collected errors: the conditions already
/// carry the failure reasons, the requeue only re-triggers evaluation.
const REQUEUE_SOON_INTERVAL: Duration = Duration::from_secs(5);

fn reset_owned_conditions(status: &mut StatusHandler) {
    for prefix in OWNED_CONDITION_PREFIXES {
        status.reset_conditions(prefix);
    }
}

/// One reconciliation pass: gate on management state and the status schema,
/// verify the configured OIDC client has propagated into the console
/// deployment, and publish the verdict onto the Console conditions and the
/// authentication OIDC client status.
#[instrument(skip(authn, ctx))]
pub async fn reconcile_oidc(authn: Arc<Authentication>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.consolop_ctx.metrics.reconcile_count_and_measure();
    let stores = &ctx.consolop_ctx.stores;

    let console = stores
        .console()
        .get(&ObjectRef::new(CONFIG_RESOURCE_NAME))
        .ok_or(Error::MissingObject("console"))?;

    match console.spec.management_state {
        ManagementState::Managed => debug!(msg = "console is in a managed state"),
        ManagementState::Unmanaged => {
            debug!(msg = "console is in an unmanaged state");
            return Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL));
        }
        ManagementState::Removed => {
            debug!(msg = "console has been removed");
            return Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL));
        }
        ManagementState::Unknown => return Err(Error::UnknownManagementState),
    }

    info!(msg = "reconciling OIDC client setup");
    let mut status = StatusHandler::new();

    let authn_crd = stores
        .crd()
        .get(&ObjectRef::new(AUTHENTICATION_CRD_NAME))
        .ok_or(Error::MissingObject("authentications CRD"));
    let oidc_clients_schema = match authn_crd.and_then(|crd| authn_crd_has_oidc_clients(&crd)) {
        Ok(present) => present,
        Err(e) => return status.flush_and_return(&ctx.consolop_ctx, Err(e)).await,
    };

    // the schema feature-gates this controller: API validation is assumed to
    // reject `type: OIDC` while `.status.oidcClients` does not exist
    if !oidc_clients_schema {
        reset_owned_conditions(&mut status);
        return status
            .flush_and_return(
                &ctx.consolop_ctx,
                Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL)),
            )
            .await;
    }

    if authn.spec.auth_type != AuthenticationType::Oidc {
        debug!(msg = format!("authentication type is {}", authn.spec.auth_type));
        ctx.auth_status.with_current_oidc_client("");
        ctx.auth_status
            .unavailable("AuthenticationTypeNotOIDC", "authentication type is not OIDC");
        let apply_result = ctx
            .auth_status
            .apply(&ctx.consolop_ctx.client, &authn)
            .await;
        status.add_conditions(progressing_or_degraded(
            COND_AUTH_STATUS_HANDLER,
            REASON_FAILED_APPLY,
            apply_result.as_ref().err(),
            None,
        ));

        // reset the other condition pair set by this controller
        status.reset_conditions(COND_OIDC_CLIENT_CONFIG);
        return status
            .flush_and_return(
                &ctx.consolop_ctx,
                apply_result.map(|()| Action::requeue(DEFAULT_RECONCILE_INTERVAL)),
            )
            .await;
    }

    // errors are collected so that independent status writes still happen
    // before the pass is retried
    let mut errs: Vec<Error> = Vec::new();

    match sync_auth_type_oidc(stores, &ctx.auth_status, &authn) {
        Ok(not_ready) => status.add_conditions(progressing_or_degraded(
            COND_OIDC_CLIENT_CONFIG,
            REASON_SYNC_FAILED,
            None,
            not_ready.as_deref(),
        )),
        Err(e @ Error::InvalidClientConfig(_)) => {
            // an ID-less client entry is an authoring bug upstream; no further
            // check is meaningful
            return status.flush_and_return(&ctx.consolop_ctx, Err(e)).await;
        }
        Err(e) => {
            status.add_conditions(progressing_or_degraded(
                COND_OIDC_CLIENT_CONFIG,
                REASON_SYNC_FAILED,
                Some(&e),
                None,
            ));
            errs.push(e);
        }
    }

    let apply_result = ctx
        .auth_status
        .apply(&ctx.consolop_ctx.client, &authn)
        .await;
    status.add_conditions(progressing_or_degraded(
        COND_AUTH_STATUS_HANDLER,
        REASON_FAILED_APPLY,
        apply_result.as_ref().err(),
        None,
    ));
    if let Err(e) = apply_result {
        errs.push(e);
    }

    let requeue = if errs.is_empty() {
        DEFAULT_RECONCILE_INTERVAL
    } else {
        REQUEUE_SOON_INTERVAL
    };
    status
        .flush_and_return(&ctx.consolop_ctx, Ok(Action::requeue(requeue)))
        .await
}

/// The OIDC branch of the pass. Returns the not-ready message while the
/// deployment is still converging, `None` once the configuration is fully
/// applied, and an error for hard failures; the auth status handler is updated
/// along the way.
fn sync_auth_type_oidc(
    stores: &Stores,
    auth_status: &AuthStatusHandler,
    authn: &Authentication,
) -> Result<Option<String>> {
    let Some(client_config) = oidc_client_config(authn) else {
        auth_status.with_current_oidc_client("");
        auth_status.unavailable("OIDCClientConfig", "no OIDC client found");
        return Ok(None);
    };

    if client_config.client_id.is_empty() {
        return Err(Error::InvalidClientConfig(
            "no ID set on the console OIDC client",
        ));
    }
    auth_status.with_current_oidc_client(&client_config.client_id);

    if client_config.client_secret_name.is_none() {
        auth_status.degraded(
            "OIDCClientMissingSecret",
            "no client secret in the OIDC client config",
        );
        return Ok(None);
    }

    let Some(client_secret) = stores
        .secret()
        .get(&ObjectRef::new(CLIENT_SECRET_NAME).within(TARGET_NAMESPACE))
    else {
        let err = Error::MissingObject("console OIDC client secret");
        auth_status.degraded("OIDCClientSecretGet", &err.to_string());
        return Err(err);
    };

    let Some(console_deployment) = stores
        .deployment()
        .get(&ObjectRef::new(CONSOLE_DEPLOYMENT_NAME).within(TARGET_NAMESPACE))
    else {
        let err = Error::MissingObject("console deployment");
        auth_status.degraded("DeploymentOIDCConfig", &err.to_string());
        return Err(err);
    };

    let server_ca_config = server_ca_config_name(authn).and_then(|name| {
        stores
            .config_map()
            .get(&ObjectRef::new(name).within(TARGET_NAMESPACE))
    });

    match check_client_config_status(
        authn,
        &client_secret,
        &console_deployment,
        server_ca_config.as_deref(),
    ) {
        Err(e) => {
            auth_status.degraded("DeploymentOIDCConfig", &e.to_string());
            Err(e)
        }
        Ok(Readiness::NotReady(message)) => {
            auth_status.progressing("DeploymentOIDCConfig", &message);
            Ok(Some(message))
        }
        Ok(Readiness::Ready) => {
            auth_status.available("OIDCConfigAvailable", "");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod test {
    use super::deployment::{OIDC_CA_TRUST_VERSION_ANNOTATION, OIDC_SECRET_VERSION_ANNOTATION};
    use super::{
        CLIENT_SECRET_NAME, COMPONENT_NAME, CONSOLE_DEPLOYMENT_NAME, TARGET_NAMESPACE,
        reset_owned_conditions, sync_auth_type_oidc,
    };

    use crate::crd::{
        Authentication, AuthenticationSpec, AuthenticationType, ConfigMapReference,
        OidcClientEntry, OidcIssuer, OidcProvider, SecretReference,
    };
    use crate::reconcile::auth_status::{AuthStatusHandler, TYPE_AVAILABLE, TYPE_DEGRADED};

    use consolop_operator::controller::Stores;
    use consolop_operator::error::Error;
    use consolop_operator::status::{CONDITION_FALSE, CONDITION_TRUE, StatusHandler};

    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::runtime::reflector;
    use kube::runtime::watcher;

    fn authn(clients: Vec<OidcClientEntry>, certificate_authority: Option<&str>) -> Authentication {
        let mut authn = Authentication::new(
            "cluster",
            AuthenticationSpec {
                auth_type: AuthenticationType::Oidc,
                oidc_providers: vec![OidcProvider {
                    name: "keycloak".to_string(),
                    issuer: OidcIssuer {
                        url: "https://idp.example.com".to_string(),
                        certificate_authority: certificate_authority.map(|name| {
                            ConfigMapReference {
                                name: name.to_string(),
                            }
                        }),
                    },
                    oidc_clients: clients,
                }],
            },
        );
        authn.metadata.generation = Some(1);
        authn
    }

    fn console_client(client_id: &str, secret_name: Option<&str>) -> OidcClientEntry {
        OidcClientEntry {
            component_name: COMPONENT_NAME.to_string(),
            component_namespace: TARGET_NAMESPACE.to_string(),
            client_id: client_id.to_string(),
            client_secret: secret_name.map(|name| SecretReference {
                name: name.to_string(),
            }),
            extra_scopes: vec![],
        }
    }

    fn client_secret(resource_version: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(CLIENT_SECRET_NAME.to_string()),
                namespace: Some(TARGET_NAMESPACE.to_string()),
                resource_version: Some(resource_version.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn console_deployment(annotations: &[(&str, &str)]) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(CONSOLE_DEPLOYMENT_NAME.to_string()),
                namespace: Some(TARGET_NAMESPACE.to_string()),
                generation: Some(1),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            status: Some(DeploymentStatus {
                observed_generation: Some(1),
                replicas: Some(1),
                updated_replicas: Some(1),
                available_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn stores(
        secrets: Vec<Secret>,
        config_maps: Vec<ConfigMap>,
        deployments: Vec<Deployment>,
    ) -> Stores {
        let (secret_store, mut secret_writer) = reflector::store::<Secret>();
        for secret in secrets {
            secret_writer.apply_watcher_event(&watcher::Event::Apply(secret));
        }
        let (config_map_store, mut config_map_writer) = reflector::store::<ConfigMap>();
        for config_map in config_maps {
            config_map_writer.apply_watcher_event(&watcher::Event::Apply(config_map));
        }
        let (deployment_store, mut deployment_writer) = reflector::store::<Deployment>();
        for deployment in deployments {
            deployment_writer.apply_watcher_event(&watcher::Event::Apply(deployment));
        }
        Stores::new(
            None,
            None,
            Some(secret_store),
            Some(config_map_store),
            Some(deployment_store),
        )
    }

    fn handler() -> AuthStatusHandler {
        AuthStatusHandler::new(
            COMPONENT_NAME,
            TARGET_NAMESPACE,
            "authentications.consolop.rs",
        )
    }

    fn published_condition_reason(handler: &AuthStatusHandler, authn: &Authentication, type_: &str) -> String {
        handler.merged_oidc_clients(authn)[0]
            .conditions
            .as_ref()
            .unwrap()
            .iter()
            .find(|c| c.type_ == type_)
            .unwrap()
            .reason
            .clone()
    }

    #[test]
    fn test_reset_owned_conditions_covers_all_owned_types() {
        let mut status = StatusHandler::new();
        reset_owned_conditions(&mut status);

        let types = status
            .conditions()
            .iter()
            .map(|c| c.type_.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                "OIDCClientConfigProgressing",
                "OIDCClientConfigDegraded",
                "AuthStatusHandlerProgressing",
                "AuthStatusHandlerDegraded",
            ]
        );
        assert!(
            status
                .conditions()
                .iter()
                .all(|c| c.status == CONDITION_FALSE && c.reason.is_empty())
        );
    }

    #[test]
    fn test_sync_without_client_entry() {
        let authn = authn(vec![], None);
        let handler = handler();
        let stores = stores(vec![], vec![], vec![]);

        let result = sync_auth_type_oidc(&stores, &handler, &authn).unwrap();
        assert_eq!(result, None);

        let clients = handler.merged_oidc_clients(&authn);
        assert_eq!(clients[0].current_oidc_client_id, None);
        assert_eq!(
            published_condition_reason(&handler, &authn, TYPE_AVAILABLE),
            "OIDCClientConfig"
        );
    }

    #[test]
    fn test_sync_with_empty_client_id_is_a_hard_error() {
        let authn = authn(vec![console_client("", Some("irrelevant"))], None);
        let handler = handler();
        let stores = stores(vec![], vec![], vec![]);

        let result = sync_auth_type_oidc(&stores, &handler, &authn);
        assert!(matches!(result, Err(Error::InvalidClientConfig(_))));

        // the consistency checker never ran, so no verdict was derived
        assert_eq!(handler.merged_oidc_clients(&authn)[0].conditions, None);
    }

    #[test]
    fn test_sync_without_secret_ref_degrades_without_error() {
        let authn = authn(vec![console_client("console-client", None)], None);
        let handler = handler();
        let stores = stores(vec![], vec![], vec![]);

        let result = sync_auth_type_oidc(&stores, &handler, &authn).unwrap();
        assert_eq!(result, None);
        assert_eq!(
            published_condition_reason(&handler, &authn, TYPE_DEGRADED),
            "OIDCClientMissingSecret"
        );
    }

    #[test]
    fn test_sync_with_missing_secret_degrades_and_errors() {
        let authn = authn(
            vec![console_client("console-client", Some("console-oidc-client"))],
            None,
        );
        let handler = handler();
        let stores = stores(vec![], vec![], vec![]);

        let result = sync_auth_type_oidc(&stores, &handler, &authn);
        assert!(matches!(result, Err(Error::MissingObject(_))));
        assert_eq!(
            published_condition_reason(&handler, &authn, TYPE_DEGRADED),
            "OIDCClientSecretGet"
        );
    }

    #[test]
    fn test_sync_all_green() {
        let authn = authn(
            vec![console_client("console-client", Some("console-oidc-client"))],
            None,
        );
        let handler = handler();
        let stores = stores(
            vec![client_secret("5")],
            vec![],
            vec![console_deployment(&[(OIDC_SECRET_VERSION_ANNOTATION, "5")])],
        );

        let result = sync_auth_type_oidc(&stores, &handler, &authn).unwrap();
        assert_eq!(result, None);

        let clients = handler.merged_oidc_clients(&authn);
        assert_eq!(
            clients[0].current_oidc_client_id,
            Some("console-client".to_string())
        );
        let conditions = clients[0].conditions.as_ref().unwrap();
        let available = conditions.iter().find(|c| c.type_ == TYPE_AVAILABLE).unwrap();
        assert_eq!(available.status, CONDITION_TRUE);
        assert!(
            conditions
                .iter()
                .filter(|c| c.type_ != TYPE_AVAILABLE)
                .all(|c| c.status == CONDITION_FALSE)
        );
    }

    #[test]
    fn test_sync_with_stale_secret_is_progressing() {
        let authn = authn(
            vec![console_client("console-client", Some("console-oidc-client"))],
            None,
        );
        let handler = handler();
        let stores = stores(
            vec![client_secret("6")],
            vec![],
            vec![console_deployment(&[(OIDC_SECRET_VERSION_ANNOTATION, "5")])],
        );

        let result = sync_auth_type_oidc(&stores, &handler, &authn).unwrap();
        assert_eq!(
            result,
            Some("client secret version not up to date in current deployment".to_string())
        );
    }

    #[test]
    fn test_sync_with_missing_required_ca_degrades_and_errors() {
        let authn = authn(
            vec![console_client("console-client", Some("console-oidc-client"))],
            Some("oidc-serving-ca"),
        );
        let handler = handler();
        let stores = stores(
            vec![client_secret("5")],
            vec![],
            vec![console_deployment(&[
                (OIDC_SECRET_VERSION_ANNOTATION, "5"),
                (OIDC_CA_TRUST_VERSION_ANNOTATION, "11"),
            ])],
        );

        let result = sync_auth_type_oidc(&stores, &handler, &authn);
        assert!(matches!(result, Err(Error::MissingObject(_))));
        assert_eq!(
            published_condition_reason(&handler, &authn, TYPE_DEGRADED),
            "DeploymentOIDCConfig"
        );
    }
}
