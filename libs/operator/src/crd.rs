use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Both the Console and the Authentication config resources are cluster-scoped
/// singletons with this well-known name.
pub const CONFIG_RESOURCE_NAME: &str = "cluster";

/// The Console custom resource definition (CRD) is the operator's own
/// configuration: a cluster-scoped singleton named `cluster` that selects the
/// management state and carries the operator conditions in its status.
/// More info:
/// https://github.com/kubernetes/community/blob/master/contributors/devel/sig-architecture/api-conventions.md#spec-and-status
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    category = "consolop",
    group = "consolop.rs",
    version = "v1",
    kind = "Console",
    plural = "consoles",
    singular = "console",
    status = "ConsoleStatus",
    doc = r#"The Console custom resource definition (CRD) configures the console operator."#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.managementState"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleSpec {
    /// Whether the operator manages the console. Anything other than `Managed`
    /// pauses reconciliation without touching the published status.
    #[serde(default)]
    pub management_state: ManagementState,
}

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
    Removed,
    /// Catch-all for values this operator does not understand; the reconciler
    /// treats it as a hard error.
    Unknown,
}

serde_plain::derive_display_from_serialize!(ManagementState);

impl<'de> Deserialize<'de> for ManagementState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "Managed" => ManagementState::Managed,
            "Unmanaged" => ManagementState::Unmanaged,
            "Removed" => ManagementState::Removed,
            _ => ManagementState::Unknown,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ConsoleStatus {
    /// Conditions published by the operator's controllers. Each controller
    /// owns a fixed set of condition types and rewrites them on every pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

#[cfg(test)]
mod test {
    use super::ManagementState;

    #[test]
    fn test_management_state_parsing() {
        let state: ManagementState = serde_json::from_str(r#""Removed""#).unwrap();
        assert_eq!(state, ManagementState::Removed);

        let state: ManagementState = serde_json::from_str(r#""Paused""#).unwrap();
        assert_eq!(state, ManagementState::Unknown);
    }

    #[test]
    fn test_management_state_display() {
        assert_eq!(ManagementState::Managed.to_string(), "Managed");
        assert_eq!(ManagementState::Unmanaged.to_string(), "Unmanaged");
    }
}
