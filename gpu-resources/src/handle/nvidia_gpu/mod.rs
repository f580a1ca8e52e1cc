//! 基于 CUDA 驱动 API 的实现。
//!
//! 每个设备持有一个主上下文，每次调用前把目标设备的上下文设为当前上下文。

use crate::{
    AddressMode, ArrayDesc, ArrayRaw, DevPtr, Driver, DriverError, FilterMode, HostPtr, QueueRaw,
    ReadMode, SurfaceRaw, TextureDesc, TextureRaw,
};
use ::cuda::bindings::*;
use digit_layout::types as ty;
use log::{debug, warn};
use std::{
    ffi::{c_void, CStr},
    mem::zeroed,
    ptr::{null, null_mut},
};

const CU_STREAM_NON_BLOCKING: u32 = 1;
const CUDA_ARRAY3D_LAYERED: u32 = 1;
const CUDA_ARRAY3D_SURFACE_LDST: u32 = 2;
const CU_TRSF_READ_AS_INTEGER: u32 = 1;
const CU_TRSF_NORMALIZED_COORDINATES: u32 = 2;

macro_rules! driver {
    ($f:expr) => {{
        #[allow(unused_unsafe)]
        let result = unsafe { $f };
        if result == CUresult::CUDA_SUCCESS {
            Ok(())
        } else {
            Err(error(result))
        }
    }};
}

fn error(result: CUresult) -> DriverError {
    let mut ptr = null();
    let message = if unsafe { cuGetErrorString(result, &mut ptr) } == CUresult::CUDA_SUCCESS
        && !ptr.is_null()
    {
        unsafe { CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned()
    } else {
        format!("{result:?}")
    };
    DriverError::new(result as i32, message)
}

fn invalid_device() -> DriverError {
    error(CUresult::CUDA_ERROR_INVALID_DEVICE)
}

/// NVIDIA GPU 驱动。
pub struct Gpu {
    contexts: Vec<usize>,
}

impl Gpu {
    /// 初始化驱动并持有每个设备的主上下文。
    ///
    /// 没有设备时得到一个设备数为 0 的驱动。
    pub fn new() -> Result<Self, DriverError> {
        if let Err(::cuda::NoDevice) = ::cuda::init() {
            return Ok(Self { contexts: vec![] });
        }
        // 重置依赖 cuDevicePrimaryCtxReset，只对主上下文有效，
        // 而 `cuda::Device::context` 创建的是普通上下文，所以主上下文直接经驱动接口持有。
        let mut count = 0;
        driver!(cuDeviceGetCount(&mut count))?;

        let mut ans = Self {
            contexts: Vec::with_capacity(count as _),
        };
        for i in 0..count {
            let mut dev = 0;
            driver!(cuDeviceGet(&mut dev, i))?;
            let mut ctx = null_mut();
            driver!(cuDevicePrimaryCtxRetain(&mut ctx, dev))?;
            ans.contexts.push(ctx as usize);
        }
        debug!("{} cuda device(s) found", ans.contexts.len());
        Ok(ans)
    }

    fn enter(&self, dev: u32) -> Result<(), DriverError> {
        let ctx = *self.contexts.get(dev as usize).ok_or_else(invalid_device)?;
        driver!(cuCtxSetCurrent(ctx as CUcontext))
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        for i in 0..self.contexts.len() {
            if let Err(e) = driver!(cuDevicePrimaryCtxRelease_v2(i as _)) {
                warn!("failed to release primary context of device {i}: {e}")
            }
        }
    }
}

#[inline]
fn stream(queue: Option<QueueRaw>) -> CUstream {
    queue.map_or(null_mut(), |q| q.get() as usize as _)
}

fn address_mode(mode: AddressMode) -> CUaddress_mode {
    match mode {
        AddressMode::Wrap => CUaddress_mode::CU_TR_ADDRESS_MODE_WRAP,
        AddressMode::Clamp => CUaddress_mode::CU_TR_ADDRESS_MODE_CLAMP,
        AddressMode::Mirror => CUaddress_mode::CU_TR_ADDRESS_MODE_MIRROR,
        AddressMode::Border => CUaddress_mode::CU_TR_ADDRESS_MODE_BORDER,
    }
}

fn resource(array: ArrayRaw) -> CUDA_RESOURCE_DESC {
    let mut desc: CUDA_RESOURCE_DESC = unsafe { zeroed() };
    desc.resType = CUresourcetype::CU_RESOURCE_TYPE_ARRAY;
    desc.res.array.hArray = array.get() as usize as _;
    desc
}

impl Driver for Gpu {
    #[inline]
    fn device_count(&self) -> Result<usize, DriverError> {
        Ok(self.contexts.len())
    }

    #[inline]
    fn activate(&self, dev: u32) -> Result<(), DriverError> {
        self.enter(dev)
    }

    fn synchronize(&self, dev: u32) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuCtxSynchronize())
    }

    fn reset(&self, dev: u32) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuDevicePrimaryCtxReset_v2(dev as _))?;
        // 主上下文在下次使用时重新初始化
        self.enter(dev)
    }

    fn queue_create(&self, dev: u32) -> Result<QueueRaw, DriverError> {
        self.enter(dev)?;
        let mut raw = null_mut();
        driver!(cuStreamCreate(&mut raw, CU_STREAM_NON_BLOCKING))?;
        QueueRaw::new(raw as usize as _).ok_or_else(|| error(CUresult::CUDA_ERROR_UNKNOWN))
    }

    fn queue_synchronize(&self, dev: u32, queue: Option<QueueRaw>) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuStreamSynchronize(stream(queue)))
    }

    fn queue_destroy(&self, dev: u32, queue: QueueRaw) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuStreamDestroy_v2(stream(Some(queue))))
    }

    fn malloc(&self, dev: u32, bytes: usize) -> Result<DevPtr, DriverError> {
        self.enter(dev)?;
        let mut ptr = 0;
        driver!(cuMemAlloc_v2(&mut ptr, bytes))?;
        DevPtr::new(ptr as _).ok_or_else(|| error(CUresult::CUDA_ERROR_OUT_OF_MEMORY))
    }

    fn free(&self, dev: u32, ptr: DevPtr) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuMemFree_v2(ptr.get() as _))
    }

    fn malloc_host(&self, dev: u32, bytes: usize) -> Result<HostPtr, DriverError> {
        self.enter(dev)?;
        let mut ptr = null_mut::<c_void>();
        driver!(cuMemAllocHost_v2(&mut ptr, bytes))?;
        HostPtr::from_ptr(ptr).ok_or_else(|| error(CUresult::CUDA_ERROR_OUT_OF_MEMORY))
    }

    fn free_host(&self, dev: u32, ptr: HostPtr) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuMemFreeHost(ptr.as_ptr()))
    }

    fn memset_zero(
        &self,
        dev: u32,
        ptr: DevPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError> {
        self.enter(dev)?;
        match queue {
            None => driver!(cuMemsetD8_v2(ptr.get() as _, 0, bytes)),
            Some(q) => driver!(cuMemsetD8Async(ptr.get() as _, 0, bytes, stream(Some(q)))),
        }
    }

    fn memcpy_h2d(
        &self,
        dev: u32,
        dst: DevPtr,
        src: HostPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuMemcpyHtoDAsync_v2(
            dst.get() as _,
            src.as_ptr::<c_void>(),
            bytes,
            stream(queue)
        ))
    }

    fn memcpy_d2h(
        &self,
        dev: u32,
        dst: HostPtr,
        src: DevPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuMemcpyDtoHAsync_v2(
            dst.as_ptr::<c_void>(),
            src.get() as _,
            bytes,
            stream(queue)
        ))
    }

    fn memcpy_d2d(
        &self,
        dev: u32,
        dst: DevPtr,
        src: DevPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuMemcpyDtoDAsync_v2(
            dst.get() as _,
            src.get() as _,
            bytes,
            stream(queue)
        ))
    }

    fn array_create(&self, dev: u32, desc: &ArrayDesc) -> Result<ArrayRaw, DriverError> {
        let format = if desc.format.scalar == ty::F32 {
            CUarray_format::CU_AD_FORMAT_FLOAT
        } else if desc.format.scalar == ty::U32 {
            CUarray_format::CU_AD_FORMAT_UNSIGNED_INT32
        } else {
            return Err(error(CUresult::CUDA_ERROR_NOT_SUPPORTED));
        };
        let mut flags = CUDA_ARRAY3D_SURFACE_LDST * desc.surface_load_store as u32;
        if desc.layered {
            flags |= CUDA_ARRAY3D_LAYERED
        }
        let desc = CUDA_ARRAY3D_DESCRIPTOR {
            Width: desc.extent.width,
            Height: desc.extent.height,
            Depth: desc.extent.depth,
            Format: format,
            NumChannels: desc.format.channels,
            Flags: flags,
        };

        self.enter(dev)?;
        let mut raw = null_mut();
        driver!(cuArray3DCreate_v2(&mut raw, &desc))?;
        ArrayRaw::new(raw as usize as _).ok_or_else(|| error(CUresult::CUDA_ERROR_UNKNOWN))
    }

    fn array_destroy(&self, dev: u32, array: ArrayRaw) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuArrayDestroy(array.get() as usize as _))
    }

    fn texture_create(
        &self,
        dev: u32,
        array: ArrayRaw,
        desc: &TextureDesc,
    ) -> Result<TextureRaw, DriverError> {
        let res = resource(array);
        let mut tex: CUDA_TEXTURE_DESC = unsafe { zeroed() };
        tex.addressMode = desc.address.map(address_mode);
        tex.filterMode = match desc.filter {
            FilterMode::Point => CUfilter_mode::CU_TR_FILTER_MODE_POINT,
            FilterMode::Linear => CUfilter_mode::CU_TR_FILTER_MODE_LINEAR,
        };
        tex.flags = match desc.read {
            ReadMode::ElementType => CU_TRSF_READ_AS_INTEGER,
            ReadMode::NormalizedFloat => 0,
        };
        if desc.normalized_coords {
            tex.flags |= CU_TRSF_NORMALIZED_COORDINATES
        }

        self.enter(dev)?;
        let mut raw = 0;
        driver!(cuTexObjectCreate(&mut raw, &res, &tex, null()))?;
        TextureRaw::new(raw as _).ok_or_else(|| error(CUresult::CUDA_ERROR_UNKNOWN))
    }

    fn texture_destroy(&self, dev: u32, texture: TextureRaw) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuTexObjectDestroy(texture.get() as _))
    }

    fn surface_create(&self, dev: u32, array: ArrayRaw) -> Result<SurfaceRaw, DriverError> {
        let res = resource(array);
        self.enter(dev)?;
        let mut raw = 0;
        driver!(cuSurfObjectCreate(&mut raw, &res))?;
        SurfaceRaw::new(raw as _).ok_or_else(|| error(CUresult::CUDA_ERROR_UNKNOWN))
    }

    fn surface_destroy(&self, dev: u32, surface: SurfaceRaw) -> Result<(), DriverError> {
        self.enter(dev)?;
        driver!(cuSurfObjectDestroy(surface.get() as _))
    }
}
