//! Hardware-accelerated decode setup
//!
//! Tries accelerator device types in a fixed preference order and installs a
//! format-negotiation callback on the codec context. The pixel format the
//! callback should pick is owned by the decode unit and reached through the
//! codec context's `opaque` pointer, so several decoders can coexist.

use std::ptr;

use ffmpeg_next::ffi;

/// Hardware acceleration method in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwAccelMethod {
    /// No hardware acceleration (software decode)
    None,
    /// NVIDIA CUDA / NVDEC
    Cuda,
    /// Linux VA-API
    Vaapi,
    /// macOS VideoToolbox
    VideoToolbox,
    /// Windows D3D11VA
    D3d11va,
}

impl std::fmt::Display for HwAccelMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HwAccelMethod::None => write!(f, "software"),
            HwAccelMethod::Cuda => write!(f, "cuda"),
            HwAccelMethod::Vaapi => write!(f, "vaapi"),
            HwAccelMethod::VideoToolbox => write!(f, "videotoolbox"),
            HwAccelMethod::D3d11va => write!(f, "d3d11va"),
        }
    }
}

impl HwAccelMethod {
    /// Accelerators in the order they are tried
    pub const PREFERENCE: [HwAccelMethod; 4] = [
        HwAccelMethod::Cuda,
        HwAccelMethod::Vaapi,
        HwAccelMethod::VideoToolbox,
        HwAccelMethod::D3d11va,
    ];

    fn device_type(self) -> Option<ffi::AVHWDeviceType> {
        match self {
            HwAccelMethod::None => None,
            HwAccelMethod::Cuda => Some(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA),
            HwAccelMethod::Vaapi => Some(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI),
            HwAccelMethod::VideoToolbox => Some(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX),
            HwAccelMethod::D3d11va => Some(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA),
        }
    }

    /// Native surface format frames arrive in when this accelerator decodes
    pub fn pixel_format(self) -> Option<ffi::AVPixelFormat> {
        match self {
            HwAccelMethod::None => None,
            HwAccelMethod::Cuda => Some(ffi::AVPixelFormat::AV_PIX_FMT_CUDA),
            HwAccelMethod::Vaapi => Some(ffi::AVPixelFormat::AV_PIX_FMT_VAAPI),
            HwAccelMethod::VideoToolbox => Some(ffi::AVPixelFormat::AV_PIX_FMT_VIDEOTOOLBOX),
            HwAccelMethod::D3d11va => Some(ffi::AVPixelFormat::AV_PIX_FMT_D3D11),
        }
    }
}

/// Owned reference to an FFmpeg hardware device context
pub struct HwDevice {
    ptr: *mut ffi::AVBufferRef,
    method: HwAccelMethod,
}

// The buffer reference is only touched by the thread owning the decode unit
unsafe impl Send for HwDevice {}

impl HwDevice {
    /// Create a device for `method`, or `None` if the platform lacks it
    pub fn create(method: HwAccelMethod) -> Option<Self> {
        let device_type = method.device_type()?;
        let mut ptr: *mut ffi::AVBufferRef = ptr::null_mut();

        let ret = unsafe { ffi::av_hwdevice_ctx_create(&mut ptr, device_type, ptr::null(), ptr::null_mut(), 0) };

        if ret < 0 || ptr.is_null() {
            tracing::debug!(%method, error = ret, "Hardware device unavailable");
            None
        } else {
            Some(Self { ptr, method })
        }
    }

    /// Create the first available device in preference order
    pub fn create_preferred() -> Option<Self> {
        HwAccelMethod::PREFERENCE.into_iter().find_map(Self::create)
    }

    pub fn method(&self) -> HwAccelMethod {
        self.method
    }

    /// Attach this device to an unopened codec context and install the
    /// format-negotiation callback. `wanted` must outlive the codec context.
    ///
    /// # Safety
    /// `context` must point to a valid codec context that has not been opened.
    pub unsafe fn attach(&self, context: *mut ffi::AVCodecContext, wanted: &mut ffi::AVPixelFormat) {
        (*context).hw_device_ctx = ffi::av_buffer_ref(self.ptr);
        (*context).opaque = wanted as *mut ffi::AVPixelFormat as *mut std::ffi::c_void;
        (*context).get_format = Some(negotiate_hw_format);
    }
}

impl Drop for HwDevice {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                ffi::av_buffer_unref(&mut self.ptr);
            }
        }
    }
}

/// Pick the accelerator's surface format when the decoder offers it,
/// otherwise let FFmpeg choose a software format.
unsafe extern "C" fn negotiate_hw_format(
    context: *mut ffi::AVCodecContext,
    formats: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    let wanted = (*context).opaque as *const ffi::AVPixelFormat;
    if !wanted.is_null() {
        let mut cursor = formats;
        while *cursor != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            if *cursor == *wanted {
                return *cursor;
            }
            cursor = cursor.add(1);
        }
    }

    tracing::warn!("Decoder does not offer the hardware surface format, decoding in software");
    ffi::avcodec_default_get_format(context, formats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_order() {
        assert_eq!(
            HwAccelMethod::PREFERENCE,
            [
                HwAccelMethod::Cuda,
                HwAccelMethod::Vaapi,
                HwAccelMethod::VideoToolbox,
                HwAccelMethod::D3d11va
            ]
        );
    }

    #[test]
    fn test_every_accelerator_has_a_surface_format() {
        for method in HwAccelMethod::PREFERENCE {
            assert!(method.pixel_format().is_some(), "{} lacks a pixel format", method);
            assert!(method.device_type().is_some());
        }
        assert!(HwAccelMethod::None.pixel_format().is_none());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(HwAccelMethod::None.to_string(), "software");
        assert_eq!(HwAccelMethod::Vaapi.to_string(), "vaapi");
    }
}
