use crate::crd::{Authentication, AuthenticationStatus, OidcClientStatus};

use consolop_operator::crd::CONFIG_RESOURCE_NAME;
use consolop_operator::error::{Error, Result};
use consolop_operator::status::{CONDITION_FALSE, CONDITION_TRUE, merge_conditions};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use k8s_openapi::chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::client::Client;
use parking_lot::Mutex;
use tracing::{debug, trace};

pub const TYPE_AVAILABLE: &str = "Available";
pub const TYPE_PROGRESSING: &str = "Progressing";
pub const TYPE_DEGRADED: &str = "Degraded";

static REASON_AS_EXPECTED: &str = "AsExpected";

/// Mutually-exclusive terminal states for the console's OIDC client entry.
/// They describe this controller's own apply pipeline, not the consistency
/// verdict published on the Console conditions.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ClientVerdict {
    Available { reason: String, message: String },
    Unavailable { reason: String, message: String },
    Progressing { reason: String, message: String },
    Degraded { reason: String, message: String },
}

#[derive(Debug, Default)]
struct AuthStatusState {
    current_client_id: Option<String>,
    verdict: Option<ClientVerdict>,
}

/// Projects which OIDC client is currently active for the console into the
/// authentication status, together with a small condition set for the entry.
///
/// One handler lives for the whole controller process and is mutated in place
/// on every pass; passes are serialized by the controller runtime, the mutex
/// only exists because the handler outlives any single pass.
pub struct AuthStatusHandler {
    component_name: String,
    component_namespace: String,
    field_manager: String,
    state: Mutex<AuthStatusState>,
}

impl AuthStatusHandler {
    pub fn new(component_name: &str, component_namespace: &str, field_manager: &str) -> Self {
        Self {
            component_name: component_name.to_string(),
            component_namespace: component_namespace.to_string(),
            field_manager: field_manager.to_string(),
            state: Mutex::new(AuthStatusState::default()),
        }
    }

    /// Records the client ID the configuration currently selects; an empty ID
    /// clears a previously published one.
    pub fn with_current_oidc_client(&self, client_id: &str) {
        self.state.lock().current_client_id = if client_id.is_empty() {
            None
        } else {
            Some(client_id.to_string())
        };
    }

    pub fn available(&self, reason: &str, message: &str) {
        self.state.lock().verdict = Some(ClientVerdict::Available {
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    pub fn unavailable(&self, reason: &str, message: &str) {
        self.state.lock().verdict = Some(ClientVerdict::Unavailable {
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    pub fn progressing(&self, reason: &str, message: &str) {
        self.state.lock().verdict = Some(ClientVerdict::Progressing {
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    pub fn degraded(&self, reason: &str, message: &str) {
        self.state.lock().verdict = Some(ClientVerdict::Degraded {
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    fn conditions(verdict: &ClientVerdict, observed_generation: Option<i64>) -> Vec<Condition> {
        let now = Time(Utc::now());
        let condition = |type_: &str, status: &str, reason: &str, message: &str| Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now.clone(),
            observed_generation,
        };
        let neutral = |type_: &str| condition(type_, CONDITION_FALSE, REASON_AS_EXPECTED, "");

        match verdict {
            ClientVerdict::Available { reason, message } => vec![
                condition(TYPE_AVAILABLE, CONDITION_TRUE, reason, message),
                neutral(TYPE_PROGRESSING),
                neutral(TYPE_DEGRADED),
            ],
            ClientVerdict::Unavailable { reason, message } => vec![
                condition(TYPE_AVAILABLE, CONDITION_FALSE, reason, message),
                neutral(TYPE_PROGRESSING),
                neutral(TYPE_DEGRADED),
            ],
            ClientVerdict::Progressing { reason, message } => vec![
                condition(TYPE_AVAILABLE, CONDITION_FALSE, reason, ""),
                condition(TYPE_PROGRESSING, CONDITION_TRUE, reason, message),
                neutral(TYPE_DEGRADED),
            ],
            ClientVerdict::Degraded { reason, message } => vec![
                condition(TYPE_AVAILABLE, CONDITION_FALSE, reason, ""),
                neutral(TYPE_PROGRESSING),
                condition(TYPE_DEGRADED, CONDITION_TRUE, reason, message),
            ],
        }
    }

    /// The full `oidcClients` list as it should look after this pass: the
    /// console entry rebuilt from the handler state, every other component's
    /// entry untouched.
    pub(crate) fn merged_oidc_clients(&self, authn: &Authentication) -> Vec<OidcClientStatus> {
        let state = self.state.lock();
        let current_clients = authn
            .status
            .as_ref()
            .and_then(|status| status.oidc_clients.as_ref());
        let existing_entry = current_clients.into_iter().flatten().find(|entry| {
            entry.component_name == self.component_name
                && entry.component_namespace == self.component_namespace
        });

        let conditions = state.verdict.as_ref().map(|verdict| {
            merge_conditions(
                existing_entry.and_then(|entry| entry.conditions.as_ref()),
                Self::conditions(verdict, authn.metadata.generation),
            )
        });

        let entry = OidcClientStatus {
            component_name: self.component_name.clone(),
            component_namespace: self.component_namespace.clone(),
            current_oidc_client_id: state.current_client_id.clone(),
            conditions,
        };

        let mut oidc_clients = current_clients.cloned().unwrap_or_default();
        match oidc_clients.iter_mut().find(|candidate| {
            candidate.component_name == entry.component_name
                && candidate.component_namespace == entry.component_namespace
        }) {
            Some(existing) => *existing = entry,
            None => oidc_clients.push(entry),
        }
        oidc_clients
    }

    /// Writes the handler state to the authentication status. Idempotent, and
    /// safe to call with an unset client ID, which still clears a previously
    /// published one.
    pub async fn apply(&self, client: &Client, authn: &Authentication) -> Result<()> {
        let status_patch = Patch::Apply(Authentication {
            status: Some(AuthenticationStatus {
                oidc_clients: Some(self.merged_oidc_clients(authn)),
            }),
            ..Authentication::default()
        });
        debug!(msg = "updating authentication OIDC client status");
        trace!(msg = format!("status patch {status_patch:?}"));
        let patch = PatchParams::apply(&self.field_manager).force();
        let authn_api = Api::<Authentication>::all(client.clone());
        let _o = authn_api
            .patch_status(CONFIG_RESOURCE_NAME, &patch, &status_patch)
            .await
            .map_err(|e| {
                Error::KubeError(
                    "failed to patch Authentication/status".to_string(),
                    Box::new(e),
                )
            })?;
        Ok(())
    }
}
