use consolop_operator::error::{Error, Result};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

pub const AUTHENTICATION_CRD_NAME: &str = "authentications.consolop.rs";

/// Whether the authentications CRD serves a `.status.oidcClients` field.
///
/// The schema feature-gates the whole OIDC status pipeline: it can appear and
/// disappear across upgrades, so the answer is recomputed from the snapshot on
/// every pass. The lookup targets the one version that is both served and
/// stored; a CRD without such a version is a configuration inconsistency the
/// caller has to surface, not a state to default away.
pub fn authn_crd_has_oidc_clients(authn_crd: &CustomResourceDefinition) -> Result<bool> {
    let active_version = authn_crd
        .spec
        .versions
        .iter()
        .find(|version| version.served && version.storage)
        .ok_or(Error::MissingObject(
            "served and stored version of the authentications CRD",
        ))?;

    let clients_exist = active_version
        .schema
        .as_ref()
        .and_then(|validation| validation.open_api_v3_schema.as_ref())
        .and_then(|schema| schema.properties.as_ref())
        .and_then(|properties| properties.get("status"))
        .and_then(|status| status.properties.as_ref())
        .is_some_and(|status_properties| status_properties.contains_key("oidcClients"));

    Ok(clients_exist)
}

#[cfg(test)]
mod test {
    use super::authn_crd_has_oidc_clients;

    use std::collections::BTreeMap;

    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinition, CustomResourceDefinitionSpec, CustomResourceDefinitionVersion,
        CustomResourceValidation, JSONSchemaProps,
    };

    fn status_schema(status_fields: &[&str]) -> CustomResourceValidation {
        let status_properties = status_fields
            .iter()
            .map(|field| (field.to_string(), JSONSchemaProps::default()))
            .collect::<BTreeMap<_, _>>();

        CustomResourceValidation {
            open_api_v3_schema: Some(JSONSchemaProps {
                properties: Some(BTreeMap::from([(
                    "status".to_string(),
                    JSONSchemaProps {
                        properties: Some(status_properties),
                        ..Default::default()
                    },
                )])),
                ..Default::default()
            }),
        }
    }

    fn authn_crd(versions: Vec<CustomResourceDefinitionVersion>) -> CustomResourceDefinition {
        CustomResourceDefinition {
            spec: CustomResourceDefinitionSpec {
                versions,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn version(
        name: &str,
        served: bool,
        storage: bool,
        schema: Option<CustomResourceValidation>,
    ) -> CustomResourceDefinitionVersion {
        CustomResourceDefinitionVersion {
            name: name.to_string(),
            served,
            storage,
            schema,
            ..Default::default()
        }
    }

    #[test]
    fn test_oidc_clients_field_present() {
        let crd = authn_crd(vec![version(
            "v1",
            true,
            true,
            Some(status_schema(&["conditions", "oidcClients"])),
        )]);
        assert!(authn_crd_has_oidc_clients(&crd).unwrap());
    }

    #[test]
    fn test_oidc_clients_field_absent() {
        let crd = authn_crd(vec![version(
            "v1",
            true,
            true,
            Some(status_schema(&["conditions"])),
        )]);
        assert!(!authn_crd_has_oidc_clients(&crd).unwrap());
    }

    #[test]
    fn test_skips_versions_not_served_and_stored() {
        let crd = authn_crd(vec![
            version(
                "v1alpha1",
                true,
                false,
                Some(status_schema(&["oidcClients"])),
            ),
            version("v1", true, true, Some(status_schema(&["conditions"]))),
        ]);
        assert!(!authn_crd_has_oidc_clients(&crd).unwrap());
    }

    #[test]
    fn test_no_active_version_is_an_error() {
        let crd = authn_crd(vec![version(
            "v1",
            true,
            false,
            Some(status_schema(&["oidcClients"])),
        )]);
        assert!(authn_crd_has_oidc_clients(&crd).is_err());
    }

    #[test]
    fn test_missing_schema_means_no_capability() {
        let crd = authn_crd(vec![version("v1", true, true, None)]);
        assert!(!authn_crd_has_oidc_clients(&crd).unwrap());
    }
}
