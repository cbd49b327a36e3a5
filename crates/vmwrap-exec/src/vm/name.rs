use vmwrap_model::{BackendKind, JobDescriptor, TaskIndex};

/// Stable VM name for task `index` running `image`.
///
/// Characters outside `[A-Za-z0-9_-]` become `-` so the name is valid for
/// the VM service regardless of how the image is referenced.
pub fn vm_name(prefix: &str, index: TaskIndex, image: &str) -> String {
    let image: String = image
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    format!("{prefix}-{index}-{}", image.trim_matches('-'))
}

/// Every VM name `job` may drive under `prefix`, in task order.
pub fn job_vm_names(prefix: &str, job: &JobDescriptor) -> Vec<String> {
    job.tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.backend == BackendKind::Vm)
        .filter_map(|(i, t)| t.vm_image.as_deref().map(|image| vm_name(prefix, i, image)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_image_reference() {
        assert_eq!(vm_name("vmwrap", 2, "ubuntu:22.04"), "vmwrap-2-ubuntu-22-04");
        assert_eq!(vm_name("w", 0, "/images/base.qcow2"), "w-0-images-base-qcow2");
    }

    #[test]
    fn job_names_cover_vm_tasks_only() {
        use vmwrap_model::TaskDescriptor;

        let job = JobDescriptor::new(vec![
            TaskDescriptor::vm("img", "/a"),
            TaskDescriptor::native("b"),
            TaskDescriptor::vm("ubuntu:22.04", "/c"),
        ]);
        assert_eq!(
            job_vm_names("slot7", &job),
            vec!["slot7-0-img".to_string(), "slot7-2-ubuntu-22-04".to_string()]
        );
    }

    #[test]
    fn same_task_gets_same_name() {
        assert_eq!(vm_name("p", 3, "img"), vm_name("p", 3, "img"));
        assert_ne!(vm_name("p", 3, "img"), vm_name("p", 4, "img"));
    }
}
