// SPDX-License-Identifier: CEPL-1.0
//! Windowing lives here so the renderer crates never name `winit` directly.
pub use winit;
