//! Container identity detection.
//!
//! The allocator keys sequence counters by container name, so every process
//! sharing a name shares (and races on) one counter. Inside a container the
//! cgroup path ends in the container id, which is unique per instance.

const CGROUP_PATH: &str = "/proc/self/cgroup";

/// Reads the current container's id from `/proc/self/cgroup`.
///
/// Returns an empty string outside a container or if the file is unreadable.
pub fn detect_container_name() -> String {
    match std::fs::read_to_string(CGROUP_PATH) {
        Ok(contents) => container_name_from_cgroup(&contents),
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %_e, "cannot read {CGROUP_PATH}, using an empty container name");
            String::new()
        }
    }
}

/// Extracts the container id from the contents of a cgroup file.
///
/// Prefers the cgroup v1 line of the `cpu` controller and falls back to the
/// unified v2 hierarchy (`0::/...`). The id is the last path segment.
pub fn container_name_from_cgroup(contents: &str) -> String {
    let mut unified = None;
    for line in contents.lines() {
        let mut fields = line.splitn(3, ':');
        let (Some(_), Some(controllers), Some(path)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if controllers.split(',').any(|c| c == "cpu") {
            return last_segment(path);
        }
        if controllers.is_empty() {
            unified = Some(path);
        }
    }
    unified.map(last_segment).unwrap_or_default()
}

fn last_segment(path: &str) -> String {
    path.trim().rsplit('/').next().unwrap_or("").to_string()
}
