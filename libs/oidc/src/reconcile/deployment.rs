use crate::crd::Authentication;

use consolop_k8s_util::deployment::is_available_and_updated;
use consolop_k8s_util::types::annotation;
use consolop_operator::error::{Error, Result};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;

/// Annotations the console deployment carries to record which version of each
/// input it last applied.
pub const OIDC_SECRET_VERSION_ANNOTATION: &str = "consolop.rs/oidc-secret-version";
pub const OIDC_CA_TRUST_VERSION_ANNOTATION: &str = "consolop.rs/oidc-ca-trust-version";

/// Outcome of the consistency check: either the deployment runs the current
/// configuration, or it is still converging for the given reason. Hard
/// failures travel separately as errors so callers can tell "still
/// converging" from "broken".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

/// Name of the CA trust config map the first provider's issuer points at, if
/// any.
pub fn server_ca_config_name(authn: &Authentication) -> Option<&str> {
    authn
        .spec
        .oidc_providers
        .first()
        .and_then(|provider| provider.issuer.certificate_authority.as_ref())
        .map(|reference| reference.name.as_str())
        .filter(|name| !name.is_empty())
}

/// Checks whether the current client configuration is in use by the console
/// deployment: the deployment must be available and fully rolled out, and the
/// resource versions recorded on it must match the live client secret and,
/// when configured, the live CA trust config map.
///
/// Resource versions are opaque tokens compared for exact equality; contents
/// are never inspected. The first non-ready outcome short-circuits.
pub fn check_client_config_status(
    authn: &Authentication,
    client_secret: &Secret,
    deployment: &Deployment,
    server_ca_config: Option<&ConfigMap>,
) -> Result<Readiness> {
    if !is_available_and_updated(deployment) {
        return Ok(Readiness::NotReady(
            "deployment unavailable or outdated".to_string(),
        ));
    }

    if client_secret.resource_version().unwrap_or_default()
        != annotation(&deployment.metadata, OIDC_SECRET_VERSION_ANNOTATION)
    {
        return Ok(Readiness::NotReady(
            "client secret version not up to date in current deployment".to_string(),
        ));
    }

    if server_ca_config_name(authn).is_some() {
        let server_ca_config = server_ca_config.ok_or(Error::MissingObject(
            "OIDC server CA trust config map",
        ))?;

        if server_ca_config.resource_version().unwrap_or_default()
            != annotation(&deployment.metadata, OIDC_CA_TRUST_VERSION_ANNOTATION)
        {
            return Ok(Readiness::NotReady(
                "OIDC provider CA version not up to date in current deployment".to_string(),
            ));
        }
    }

    Ok(Readiness::Ready)
}
