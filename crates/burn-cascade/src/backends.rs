//! Backend selection for running a cascade
//!
//! One backend is picked from the enabled features, first match wins:
//! `ndarray` (the default), `tch`, `wgpu`, then `cuda`. [`DefaultBackend`]
//! and [`default_device`] name that choice so binaries and tests do not
//! repeat the feature logic.
//!
//! ```ignore
//! use burn_cascade::backends::{default_device, DefaultBackend};
//! use burn_cascade::DiffusionCascade;
//!
//! let device = default_device();
//! let cascade = DiffusionCascade::<DefaultBackend>::from_file("cascade.yaml", &factory, &device)?;
//! ```

#[cfg(feature = "ndarray")]
mod selected {
    pub type DefaultBackend = burn_ndarray::NdArray;

    pub fn default_device() -> burn_ndarray::NdArrayDevice {
        Default::default()
    }
}

#[cfg(all(feature = "tch", not(feature = "ndarray")))]
mod selected {
    use burn_tch::LibTorchDevice;

    pub type DefaultBackend = burn_tch::LibTorch;

    /// First CUDA device when libtorch can see one
    pub fn default_device() -> LibTorchDevice {
        if burn_tch::is_cuda_available() {
            LibTorchDevice::Cuda(0)
        } else {
            LibTorchDevice::Cpu
        }
    }
}

#[cfg(all(feature = "wgpu", not(any(feature = "ndarray", feature = "tch"))))]
mod selected {
    pub type DefaultBackend = burn_wgpu::Wgpu;

    pub fn default_device() -> burn_wgpu::WgpuDevice {
        Default::default()
    }
}

#[cfg(all(
    feature = "cuda",
    not(any(feature = "ndarray", feature = "tch", feature = "wgpu"))
))]
mod selected {
    pub type DefaultBackend = burn_cuda::Cuda;

    pub fn default_device() -> burn_cuda::CudaDevice {
        Default::default()
    }
}

#[cfg(any(feature = "ndarray", feature = "tch", feature = "wgpu", feature = "cuda"))]
pub use selected::{default_device, DefaultBackend};
