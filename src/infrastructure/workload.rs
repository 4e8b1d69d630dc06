use crate::constants::DEFAULT_WORKLOAD_TAG;
use crate::errors::{CommandError, EngineError};
use crate::events::Stage::Workload;
use crate::events::{EventDetails, WorkloadStep};
use crate::infrastructure::action::InfraLogger;
use crate::infrastructure::registry::RegistryInfo;
use crate::io_models::cluster::ClusterDescriptor;
use crate::services::oci::{OciRegistryClient, resolve_registry_credentials};
use crate::string::sanitize_oci_repository_name;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::Path;
use url::Url;
use walkdir::WalkDir;

const EMPTY_KUSTOMIZATION: &str =
    "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources: []\n";

/// Artifact pushed by `workload push`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedArtifact {
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

/// Repository name derived from the workload source directory.
pub fn workload_repository_name(descriptor: &ClusterDescriptor) -> String {
    let raw = descriptor.workload.source_directory.to_string_lossy();
    let sanitized = sanitize_oci_repository_name(&raw);
    if sanitized.is_empty() {
        "workload".to_string()
    } else {
        sanitized
    }
}

/// Packages a directory into the tar+gzip layer of a flux-style artifact.
pub fn package_directory(source_dir: &Path) -> Result<Vec<u8>, CommandError> {
    let build = || -> anyhow::Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut archive = tar::Builder::new(encoder);

        for entry in WalkDir::new(source_dir).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(source_dir)?;
            archive.append_path_with_name(entry.path(), relative)?;
        }

        Ok(archive.into_inner()?.finish()?)
    };

    build().map_err(|e| {
        CommandError::new(
            format!("cannot package directory `{}`", source_dir.display()),
            Some(e.to_string()),
            None,
        )
    })
}

/// The artifact pushed when the source directory has nothing to offer yet,
/// so GitOps engines have something to reconcile.
pub fn package_empty_kustomization() -> Result<Vec<u8>, CommandError> {
    let build = || -> anyhow::Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut archive = tar::Builder::new(encoder);

        let content = EMPTY_KUSTOMIZATION.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        archive.append_data(&mut header, "kustomization.yaml", content)?;

        Ok(archive.into_inner()?.finish()?)
    };

    build().map_err(|e| CommandError::new("cannot package empty kustomization".to_string(), Some(e.to_string()), None))
}

/// `workload push`: validate, package and push the source directory as an OCI
/// artifact to the cluster-local registry.
pub fn push_workload(
    descriptor: &ClusterDescriptor,
    registry: &RegistryInfo,
    tag: Option<&str>,
    event_details: EventDetails,
    logger: &dyn InfraLogger,
) -> Result<PushedArtifact, Box<EngineError>> {
    let tag = tag.unwrap_or(DEFAULT_WORKLOAD_TAG);
    let repository = workload_repository_name(descriptor);
    let source_dir = &descriptor.workload.source_directory;

    let validate_details =
        EventDetails::clone_changing_stage(event_details.clone(), Workload(WorkloadStep::Validate));
    if !source_dir.is_dir() {
        return Err(Box::new(EngineError::new_workload_source_missing(
            validate_details,
            source_dir.to_string_lossy().to_string(),
        )));
    }

    if descriptor.workload.validate_on_push {
        let kustomization = source_dir.join("kustomization.yaml");
        if !kustomization.is_file() {
            return Err(Box::new(EngineError::new_workload_packaging_error(
                validate_details,
                CommandError::new_from_safe_message(format!(
                    "`{}` has no kustomization.yaml",
                    source_dir.display()
                )),
            )));
        }
    }

    logger.activity(format!("packaging `{}`", source_dir.display()).into());
    let content = package_directory(source_dir).map_err(|e| {
        Box::new(EngineError::new_workload_packaging_error(
            EventDetails::clone_changing_stage(event_details.clone(), Workload(WorkloadStep::Package)),
            e,
        ))
    })?;

    let push_details = EventDetails::clone_changing_stage(event_details, Workload(WorkloadStep::Push));
    let endpoint = Url::parse(&registry.host_endpoint()).map_err(|e| {
        Box::new(EngineError::new_oci_artifact_push_error(
            push_details.clone(),
            repository.clone(),
            CommandError::new_from_safe_message(e.to_string()),
        ))
    })?;
    let mut client = OciRegistryClient::new(endpoint).map_err(|e| {
        Box::new(EngineError::new_oci_artifact_push_error(
            push_details.clone(),
            repository.clone(),
            CommandError::new_from_safe_message(e.to_string()),
        ))
    })?;

    if let Some(creds_ref) = &registry.creds_ref {
        match resolve_registry_credentials(creds_ref) {
            Some((username, password)) => client = client.with_basic_auth(&username, &password),
            None => logger.warn(
                format!("credentials reference `{creds_ref}` did not resolve, pushing without auth").into(),
            ),
        }
    }

    let digest = client.push_artifact(&repository, tag, &content).map_err(|e| {
        Box::new(EngineError::new_oci_artifact_push_error(
            push_details,
            repository.clone(),
            CommandError::new_from_safe_message(e.to_string()),
        ))
    })?;

    logger.success(format!("pushed oci://{}:{}/{repository}:{tag}", registry.host, registry.port).into());

    Ok(PushedArtifact {
        repository,
        tag: tag.to_string(),
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_workload_repository_name() {
        // setup:
        let mut descriptor = ClusterDescriptor::from_yaml(
            r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  connection:
    kubeconfig: /tmp/kubeconfig
  workload:
    sourceDirectory: ./k8s
"#,
        )
        .unwrap();

        // execute & verify:
        assert_eq!("k8s", workload_repository_name(&descriptor));

        descriptor.workload.source_directory = std::path::PathBuf::from("");
        assert_eq!("workload", workload_repository_name(&descriptor));
    }

    #[test]
    fn test_package_directory_archives_relative_paths() {
        // setup:
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("apps")).unwrap();
        std::fs::write(dir.path().join("kustomization.yaml"), "resources: [apps]").unwrap();
        std::fs::write(dir.path().join("apps/deploy.yaml"), "kind: Deployment").unwrap();

        // execute:
        let bytes = package_directory(dir.path()).unwrap();

        // verify:
        let mut archive = tar::Archive::new(GzDecoder::new(&bytes[..]));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort_unstable();
        assert_eq!(vec!["apps/deploy.yaml".to_string(), "kustomization.yaml".to_string()], names);
    }

    #[test]
    fn test_empty_kustomization_artifact() {
        // execute:
        let bytes = package_empty_kustomization().unwrap();

        // verify: one kustomization.yaml entry with empty resources
        let mut archive = tar::Archive::new(GzDecoder::new(&bytes[..]));
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!("kustomization.yaml", entry.path().unwrap().to_string_lossy());
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert!(content.contains("resources: []"));
        assert!(entries.next().is_none());
    }
}
