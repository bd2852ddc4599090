use super::{COMPONENT_NAME, TARGET_NAMESPACE};

use crate::crd::Authentication;

/// Read-only view over the authentication configuration's provider list,
/// narrowed to the entry registered for the console.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidcClientConfig {
    pub client_id: String,
    /// Name of the secret the configuration points the client secret at;
    /// `None` when the entry has no usable secret reference.
    pub client_secret_name: Option<String>,
}

/// Returns the OIDC client entry configured for the console, or `None` when
/// the configuration does not mention one. An absent entry is a normal,
/// expected state, not a failure; validating required fields (a non-empty
/// client ID) is the caller's responsibility.
pub fn oidc_client_config(authn: &Authentication) -> Option<OidcClientConfig> {
    authn
        .spec
        .oidc_providers
        .iter()
        .flat_map(|provider| provider.oidc_clients.iter())
        .find(|client| {
            client.component_name == COMPONENT_NAME
                && client.component_namespace == TARGET_NAMESPACE
        })
        .map(|client| OidcClientConfig {
            client_id: client.client_id.clone(),
            client_secret_name: client
                .client_secret
                .as_ref()
                .map(|secret| secret.name.clone())
                .filter(|name| !name.is_empty()),
        })
}
