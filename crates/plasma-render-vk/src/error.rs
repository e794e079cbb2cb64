// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use plasma_render::RenderError;

/// Maps a raw Vulkan status onto the engine's error taxonomy.
pub fn map_vk(call: &'static str, result: vk::Result) -> RenderError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY => RenderError::OutOfMemory(call.to_string()),
        vk::Result::TIMEOUT | vk::Result::NOT_READY => RenderError::Timeout(call),
        vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::ChainOutOfDate,
        vk::Result::ERROR_INITIALIZATION_FAILED => {
            RenderError::InitializationFailed(call.to_string())
        }
        vk::Result::ERROR_LAYER_NOT_PRESENT
        | vk::Result::ERROR_EXTENSION_NOT_PRESENT
        | vk::Result::ERROR_FEATURE_NOT_PRESENT
        | vk::Result::ERROR_INCOMPATIBLE_DRIVER
        | vk::Result::ERROR_FORMAT_NOT_SUPPORTED => {
            RenderError::NotSupported(format!("{call}: {result:?}"))
        }
        other => RenderError::Backend {
            call,
            detail: format!("{other:?}"),
        },
    }
}

/// `.context()`-style adapter for `VkResult`.
pub trait VkResultExt<T> {
    fn vk_context(self, call: &'static str) -> Result<T, RenderError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk_context(self, call: &'static str) -> Result<T, RenderError> {
        self.map_err(|r| map_vk(call, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plasma_render::ResultCode;

    #[test]
    fn memory_exhaustion_is_out_of_memory() {
        for r in [
            vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        ] {
            assert_eq!(
                map_vk("vkCreateSwapchainKHR", r).code(),
                ResultCode::OutOfMemory
            );
        }
    }

    #[test]
    fn stale_chain_and_timeouts_are_distinguished() {
        assert!(matches!(
            map_vk("vkAcquireNextImageKHR", vk::Result::ERROR_OUT_OF_DATE_KHR),
            RenderError::ChainOutOfDate
        ));
        assert_eq!(
            map_vk("vkWaitForFences", vk::Result::TIMEOUT).code(),
            ResultCode::Timeout
        );
        assert_eq!(
            map_vk("vkAcquireNextImageKHR", vk::Result::NOT_READY).code(),
            ResultCode::Timeout
        );
    }

    #[test]
    fn missing_driver_pieces_are_not_supported() {
        assert_eq!(
            map_vk("vkCreateInstance", vk::Result::ERROR_EXTENSION_NOT_PRESENT).code(),
            ResultCode::NotSupported
        );
        assert_eq!(
            map_vk("vkCreateInstance", vk::Result::ERROR_INCOMPATIBLE_DRIVER).code(),
            ResultCode::NotSupported
        );
    }

    #[test]
    fn everything_else_keeps_the_call_name() {
        let err: Result<(), _> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = err.vk_context("vkQueueSubmit").unwrap_err();
        assert_eq!(err.code(), ResultCode::Failure);
        assert!(err.to_string().contains("vkQueueSubmit"));
        assert!(err.to_string().contains("ERROR_DEVICE_LOST"));
    }
}
