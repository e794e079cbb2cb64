// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_VERTEX_SHADER: &str = "shaders/vert.spv";
pub const DEFAULT_FRAGMENT_SHADER: &str = "shaders/frag.spv";

#[derive(Clone, Debug)]
pub struct VkDeviceConfig {
    pub app_name: String,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub clear_color: [f32; 4],
    /// Upper bound on the fence and acquire waits; `None` waits forever.
    pub frame_timeout: Option<Duration>,
    /// Enable `VK_LAYER_KHRONOS_validation` and route its messages into tracing.
    pub validation: bool,
}

impl Default for VkDeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Plasma".to_string(),
            vertex_shader: PathBuf::from(DEFAULT_VERTEX_SHADER),
            fragment_shader: PathBuf::from(DEFAULT_FRAGMENT_SHADER),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frame_timeout: None,
            validation: cfg!(debug_assertions),
        }
    }
}

impl VkDeviceConfig {
    pub(crate) fn timeout_ns(&self) -> u64 {
        timeout_ns(self.frame_timeout)
    }
}

pub(crate) fn timeout_ns(timeout: Option<Duration>) -> u64 {
    match timeout {
        Some(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX),
        None => u64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_clear_to_opaque_black_from_fixed_paths() {
        let cfg = VkDeviceConfig::default();
        assert_eq!(cfg.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.vertex_shader, PathBuf::from("shaders/vert.spv"));
        assert_eq!(cfg.fragment_shader, PathBuf::from("shaders/frag.spv"));
        assert_eq!(cfg.timeout_ns(), u64::MAX);
    }

    #[test]
    fn timeouts_convert_to_nanoseconds() {
        assert_eq!(timeout_ns(Some(Duration::from_millis(16))), 16_000_000);
        assert_eq!(timeout_ns(Some(Duration::MAX)), u64::MAX);
    }
}
