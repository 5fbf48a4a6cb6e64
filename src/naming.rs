use serde::{Deserialize, Serialize};

/// Leading project prefix applied by the primary build system.
pub const PROJECT_PREFIX: &str = "helios-";

/// Coarse execution-environment category a job runs on, used for cost
/// estimation and fleet accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeClass {
    LinuxCpu,
    LinuxGpu,
    LinuxBigcpu,
    LinuxMultigpu,
    Rocm,
    WinCpu,
    WinGpu,
    Osx,
    Unknown,
}

impl NodeClass {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeClass::LinuxCpu => "linux-cpu",
            NodeClass::LinuxGpu => "linux-gpu",
            NodeClass::LinuxBigcpu => "linux-bigcpu",
            NodeClass::LinuxMultigpu => "linux-multigpu",
            NodeClass::Rocm => "rocm",
            NodeClass::WinCpu => "win-cpu",
            NodeClass::WinGpu => "win-gpu",
            NodeClass::Osx => "osx",
            NodeClass::Unknown => "unknown",
        }
    }

    pub const ALL: [NodeClass; 9] = [
        NodeClass::LinuxCpu,
        NodeClass::LinuxGpu,
        NodeClass::LinuxBigcpu,
        NodeClass::LinuxMultigpu,
        NodeClass::Rocm,
        NodeClass::WinCpu,
        NodeClass::WinGpu,
        NodeClass::Osx,
        NodeClass::Unknown,
    ];
}

impl std::fmt::Display for NodeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strips known decorations from a raw job/branch identifier, yielding the
/// canonical display name.
///
/// Rules fire in order; later rules assume earlier ones already did
/// (e.g. "helios-private/lint" only loses "private/" after the project
/// prefix is gone).
pub fn normalize(raw_name: &str) -> String {
    let name = raw_name.strip_prefix(PROJECT_PREFIX).unwrap_or(raw_name);
    let name = name.strip_suffix("-trigger").unwrap_or(name);
    let name = name.strip_prefix("private/").unwrap_or(name);
    let name = name.strip_prefix("ccache-cleanup-").unwrap_or(name);
    name.to_string()
}

/// Classifies a job or machine name into a [`NodeClass`].
///
/// Rules are checked top to bottom, first match wins. Platform is resolved
/// before architecture so that e.g. "win-gpu-unit" never lands on a Linux
/// class just because it mentions "gpu".
pub fn classify_node(raw_name: &str) -> NodeClass {
    let name = raw_name.to_lowercase();

    if name.contains("win") {
        if name.contains("gpu") {
            return NodeClass::WinGpu;
        }
        return NodeClass::WinCpu;
    }
    if name.contains("osx") || name.contains("mac") {
        return NodeClass::Osx;
    }
    if name.contains("rocm") {
        return NodeClass::Rocm;
    }
    if name.contains("multigpu") {
        return NodeClass::LinuxMultigpu;
    }
    if name.contains("gpu") {
        return NodeClass::LinuxGpu;
    }
    if name.contains("bigcpu") || name.contains("xlarge") {
        return NodeClass::LinuxBigcpu;
    }
    if name.contains("cpu") || name.contains("linux") {
        return NodeClass::LinuxCpu;
    }

    NodeClass::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod normalize {
        use super::*;

        #[test]
        fn strips_project_prefix() {
            assert_eq!(normalize("helios-unit-linux-cpu"), "unit-linux-cpu");
        }

        #[test]
        fn strips_trigger_suffix() {
            assert_eq!(normalize("helios-nightly-trigger"), "nightly");
        }

        #[test]
        fn strips_private_segment_after_prefix() {
            assert_eq!(normalize("helios-private/lint"), "lint");
        }

        #[test]
        fn strips_ccache_cleanup_segment() {
            assert_eq!(normalize("ccache-cleanup-linux-gpu"), "linux-gpu");
        }

        #[test]
        fn leaves_unknown_names_untouched() {
            assert_eq!(normalize("docs-build"), "docs-build");
        }

        #[test]
        fn rules_do_not_overlap() {
            // "private/" alone, without the project prefix, still fires.
            assert_eq!(normalize("private/secret-job"), "secret-job");
        }
    }

    #[cfg(test)]
    mod classify_node {
        use super::*;

        #[test]
        fn platform_resolves_before_architecture() {
            assert_eq!(classify_node("win-gpu-unit"), NodeClass::WinGpu);
            assert_eq!(classify_node("win-build"), NodeClass::WinCpu);
            assert_eq!(classify_node("osx-unit"), NodeClass::Osx);
        }

        #[test]
        fn linux_architectures() {
            assert_eq!(classify_node("unit-linux-cpu"), NodeClass::LinuxCpu);
            assert_eq!(classify_node("unit-linux-gpu"), NodeClass::LinuxGpu);
            assert_eq!(classify_node("build-bigcpu"), NodeClass::LinuxBigcpu);
            assert_eq!(classify_node("dist-multigpu"), NodeClass::LinuxMultigpu);
        }

        #[test]
        fn multigpu_wins_over_gpu() {
            assert_eq!(classify_node("linux-multigpu-8"), NodeClass::LinuxMultigpu);
        }

        #[test]
        fn rocm_is_its_own_class() {
            assert_eq!(classify_node("unit-rocm"), NodeClass::Rocm);
        }

        #[test]
        fn unmatched_names_are_unknown() {
            assert_eq!(classify_node("docs"), NodeClass::Unknown);
            assert_eq!(classify_node(""), NodeClass::Unknown);
        }
    }
}
