//! Host hardware detection used to pick a backend.

/// Hardware signals relevant to backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    pub has_cuda: bool,
}

impl Platform {
    /// Detect the running host.
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            has_cuda: detect_cuda(),
        }
    }

    /// Metal-capable Apple silicon Mac (M1 and later).
    pub fn is_apple_silicon(&self) -> bool {
        self.os == "macos" && self.arch == "aarch64"
    }
}

/// Detect an NVIDIA GPU usable through CUDA.
///
/// Checks, in order:
/// 1. `CUDA_VISIBLE_DEVICES` (an empty value or `-1` hides all devices)
/// 2. NVIDIA driver nodes on Linux
/// 3. `CUDA_PATH` set by the Windows CUDA installer
fn detect_cuda() -> bool {
    if let Ok(devices) = std::env::var("CUDA_VISIBLE_DEVICES") {
        let devices = devices.trim();
        return !devices.is_empty() && devices != "-1";
    }

    #[cfg(target_os = "linux")]
    {
        let driver_nodes = ["/proc/driver/nvidia/version", "/dev/nvidiactl"];
        if driver_nodes
            .iter()
            .any(|node| std::path::Path::new(node).exists())
        {
            return true;
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(cuda_path) = std::env::var("CUDA_PATH") {
            return std::path::Path::new(&cuda_path).exists();
        }
    }

    false
}
