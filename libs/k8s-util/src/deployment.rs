use k8s_openapi::api::apps::v1::Deployment;

/// Whether the deployment's current generation is fully rolled out and
/// observed available: the rollout controller has seen the latest spec, every
/// replica is updated and at least one is available.
pub fn is_available_and_updated(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };

    let observed_current = match (deployment.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => false,
    };

    observed_current
        && status.available_replicas.unwrap_or(0) > 0
        && status.updated_replicas.unwrap_or(0) == status.replicas.unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::is_available_and_updated;

    use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn deployment(generation: i64, status: DeploymentStatus) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                generation: Some(generation),
                ..Default::default()
            },
            status: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn test_available_and_updated() {
        let depl = deployment(
            2,
            DeploymentStatus {
                observed_generation: Some(2),
                replicas: Some(3),
                updated_replicas: Some(3),
                available_replicas: Some(3),
                ..Default::default()
            },
        );
        assert!(is_available_and_updated(&depl));
    }

    #[test]
    fn test_unavailable() {
        let depl = deployment(
            2,
            DeploymentStatus {
                observed_generation: Some(2),
                replicas: Some(3),
                updated_replicas: Some(3),
                available_replicas: Some(0),
                ..Default::default()
            },
        );
        assert!(!is_available_and_updated(&depl));
    }

    #[test]
    fn test_outdated_generation() {
        let depl = deployment(
            3,
            DeploymentStatus {
                observed_generation: Some(2),
                replicas: Some(3),
                updated_replicas: Some(3),
                available_replicas: Some(3),
                ..Default::default()
            },
        );
        assert!(!is_available_and_updated(&depl));
    }

    #[test]
    fn test_rollout_in_progress() {
        let depl = deployment(
            2,
            DeploymentStatus {
                observed_generation: Some(2),
                replicas: Some(3),
                updated_replicas: Some(1),
                available_replicas: Some(3),
                ..Default::default()
            },
        );
        assert!(!is_available_and_updated(&depl));
    }

    #[test]
    fn test_no_status() {
        let depl = Deployment {
            metadata: ObjectMeta {
                generation: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!is_available_and_updated(&depl));
    }
}
