//! Job descriptor loading.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};
use vmwrap_model::{JobDescriptor, ValidationError};

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("cannot read job descriptor {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed job descriptor: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid job descriptor: {0}")]
    Invalid(#[from] ValidationError),
}

/// Read and validate the job descriptor at `path`.
#[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn load(path: impl AsRef<Path>) -> Result<JobDescriptor, DescriptorError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&raw)
}

/// Parse and validate a descriptor held in memory.
pub fn parse(raw: &str) -> Result<JobDescriptor, DescriptorError> {
    let job: JobDescriptor = serde_json::from_str(raw)?;
    job.validate()?;
    debug!(
        target: "vmwrap.core.descriptor",
        tasks = job.len(),
        helpers = job.helpers.len(),
        needs_manager = job.needs_manager(),
        "job descriptor loaded"
    );
    Ok(job)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use vmwrap_model::BackendKind;

    use super::*;

    const JOB: &str = r#"{
        "helpers": [{"program": "vm-service", "args": ["--port", "8765"]}],
        "tasks": [
            {"app_path": "prep", "command_line": "--fast", "output_files": ["a.dat"]},
            {"backend": "vm", "vm_image": "ubuntu-22", "app_path": "/opt/sim", "weight": 2.0,
             "copy_app": false, "input_files": ["a.dat"], "stdout": "sim.log"}
        ]
    }"#;

    #[test]
    fn loads_ordered_tasks_and_helpers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, JOB).unwrap();

        let job = load(&path).unwrap();
        assert_eq!(job.len(), 2);
        assert_eq!(job.helpers[0].args, vec!["--port", "8765"]);
        assert_eq!(job.tasks[0].backend, BackendKind::Native);
        assert_eq!(job.tasks[0].weight, 1.0);
        assert_eq!(job.tasks[1].backend, BackendKind::Vm);
        assert_eq!(job.tasks[1].weight, 2.0);
        assert!(job.needs_manager());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, DescriptorError::Read { .. }));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(parse("{\"tasks\": ["), Err(DescriptorError::Parse(_))));
        assert!(matches!(
            parse(r#"{"tasks": [{"app_path": "a", "bogus": 1}]}"#),
            Err(DescriptorError::Parse(_))
        ));
    }

    #[test]
    fn invalid_contents_are_rejected() {
        for raw in [
            r#"{"tasks": []}"#,
            r#"{"tasks": [{"app_path": ""}]}"#,
            r#"{"tasks": [{"app_path": "a", "weight": 0}]}"#,
            r#"{"tasks": [{"app_path": "a", "weight": -1.5}]}"#,
            r#"{"tasks": [{"backend": "vm", "app_path": "a"}]}"#,
            r#"{"helpers": [{"program": " "}], "tasks": [{"app_path": "a"}]}"#,
        ] {
            assert!(matches!(parse(raw), Err(DescriptorError::Invalid(_))), "{raw}");
        }
    }
}
