use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The Authentication custom resource definition (CRD) is the cluster-wide
/// authentication configuration: a cluster-scoped singleton named `cluster`
/// that selects the authentication flow and, for the OIDC flow, lists the
/// external providers and the per-component client registrations. The console
/// operator only reads the spec; it owns the `oidcClients` entry for the
/// console component in the status.
/// More info:
/// https://github.com/kubernetes/community/blob/master/contributors/devel/sig-architecture/api-conventions.md#spec-and-status
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    category = "consolop",
    group = "consolop.rs",
    version = "v1",
    kind = "Authentication",
    plural = "authentications",
    singular = "authentication",
    status = "AuthenticationStatus",
    doc = r#"The Authentication custom resource definition (CRD) holds the cluster-wide
    authentication configuration."#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationSpec {
    /// The authentication flow used by the cluster. OIDC client state is only
    /// reported while this is `OIDC`.
    #[serde(rename = "type", default)]
    pub auth_type: AuthenticationType,

    /// External OIDC identity providers. Only the first provider's issuer is
    /// consulted for the CA trust config map.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oidc_providers: Vec<OidcProvider>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum AuthenticationType {
    #[default]
    IntegratedOAuth,
    #[serde(rename = "OIDC")]
    Oidc,
    None,
}

serde_plain::derive_display_from_serialize!(AuthenticationType);

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct OidcProvider {
    pub name: String,

    pub issuer: OidcIssuer,

    /// Client registrations for platform components consuming this provider.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oidc_clients: Vec<OidcClientEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct OidcIssuer {
    pub url: String,

    /// Config map in the target namespace carrying the CA bundle used to
    /// verify the issuer. Unset means the issuer is trusted through the
    /// system trust store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<ConfigMapReference>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapReference {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
}

/// One component's OIDC client registration. A component is identified by its
/// name/namespace pair; the console operator only looks at its own entry.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct OidcClientEntry {
    pub component_name: String,

    pub component_namespace: String,

    #[serde(default)]
    pub client_id: String,

    /// Secret in the component's namespace holding the client secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretReference>,

    /// Scopes requested in addition to the standard ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_scopes: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationStatus {
    /// Per-component OIDC client state. Each entry is owned by the component's
    /// operator and attributed through its own field manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_clients: Option<Vec<OidcClientStatus>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct OidcClientStatus {
    pub component_name: String,

    pub component_namespace: String,

    /// The client ID currently selected by the configuration; unset when no
    /// client is configured for the component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_oidc_client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}
