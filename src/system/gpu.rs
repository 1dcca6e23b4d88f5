//! GPU detection
//!
//! Best-effort probing for a GPU the inference backend can offload to.

use std::process::Command;

/// GPU information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuInfo {
    pub name: String,
    pub vram_total_mb: u64,
    pub is_available: bool,
}

impl GpuInfo {
    fn unavailable() -> Self {
        Self {
            name: "GPU not detected".to_string(),
            vram_total_mb: 0,
            is_available: false,
        }
    }

    /// Total VRAM in bytes, if known
    pub fn vram_bytes(&self) -> Option<u64> {
        (self.is_available && self.vram_total_mb > 0).then(|| self.vram_total_mb * 1024 * 1024)
    }
}

/// Detect available GPU (best effort)
pub fn detect_gpu() -> GpuInfo {
    if let Some(info) = detect_gpu_nvidia_smi() {
        return info;
    }

    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    {
        if let Some(info) = detect_gpu_apple_silicon() {
            return info;
        }
    }

    GpuInfo::unavailable()
}

/// Query NVIDIA GPUs via `nvidia-smi`
fn detect_gpu_nvidia_smi() -> Option<GpuInfo> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

fn parse_nvidia_smi(stdout: &str) -> Option<GpuInfo> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let (name, vram) = line.rsplit_once(',')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    Some(GpuInfo {
        name: format!("{} (CUDA)", name),
        vram_total_mb: vram.trim().parse::<u64>().ok()?,
        is_available: true,
    })
}

/// Apple Silicon shares system RAM with the GPU, so report total RAM as VRAM
#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
fn detect_gpu_apple_silicon() -> Option<GpuInfo> {
    let output = Command::new("sysctl")
        .args(["-n", "machdep.cpu.brand_string", "hw.memsize"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    let brand = lines.next()?.trim().to_string();
    let bytes = lines.next()?.trim().parse::<u64>().ok()?;

    Some(GpuInfo {
        name: format!("{} GPU (Metal, Unified Memory)", brand),
        vram_total_mb: bytes / 1024 / 1024,
        is_available: true,
    })
}
