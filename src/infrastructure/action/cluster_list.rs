use crate::errors::EngineError;
use crate::events::InfrastructureStep;
use crate::infrastructure::action::{InfraLogger, mk_logger};
use crate::infrastructure::infrastructure_context::InfrastructureContext;
use crate::infrastructure::models::distribution::ClusterInfo;
use crate::io_models::cluster::Distribution;
use strum::IntoEnumIterator;

/// ListPlan: enumerate clusters of the primary distribution, or of every
/// distribution with `all`. Best effort: a distribution whose tooling is
/// absent warns and contributes nothing.
pub fn list_clusters_plan(infra_ctx: &InfrastructureContext, all: bool) -> Result<Vec<ClusterInfo>, Box<EngineError>> {
    let logger = mk_logger(infra_ctx, InfrastructureStep::ListClusters);
    let factory = &infra_ctx.dependencies().provisioner_factory;

    let distributions: Vec<Distribution> = if all {
        Distribution::iter().collect()
    } else {
        vec![infra_ctx.descriptor().distribution]
    };

    let mut clusters: Vec<ClusterInfo> = vec![];
    for distribution in distributions {
        match factory.provisioner_for(distribution).list() {
            Ok(mut found) => clusters.append(&mut found),
            Err(e) => logger.warn(format!("cannot list {distribution} clusters: {e}").into()),
        }
    }

    clusters.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(clusters)
}
