mod device_array;
mod host_buffer;

pub use device_array::DeviceArray;
pub use host_buffer::HostStagingBuffer;

use crate::{device_alloc, host_alloc, DeviceError};
use std::mem::size_of;

/// `numel` 个 `T` 占用的字节数。
fn bytes_of<T>(numel: usize, host: bool) -> Result<usize, DeviceError> {
    let size = size_of::<T>();
    numel.checked_mul(size).ok_or_else(|| {
        let info = format!("[{size}x{numel} bytes]");
        if host {
            host_alloc(info)
        } else {
            device_alloc(info)
        }
    })
}

pub type DeviceArrayUint32<'ctx, D> = DeviceArray<'ctx, u32, D>;
pub type DeviceArraySingle<'ctx, D> = DeviceArray<'ctx, f32, D>;
pub type DeviceArrayDouble<'ctx, D> = DeviceArray<'ctx, f64, D>;
pub type DeviceArraySingle2<'ctx, D> = DeviceArray<'ctx, crate::Float2, D>;
pub type DeviceArraySingle3<'ctx, D> = DeviceArray<'ctx, crate::Float3, D>;
pub type DeviceArraySingle4<'ctx, D> = DeviceArray<'ctx, crate::Float4, D>;
pub type DeviceArrayDouble2<'ctx, D> = DeviceArray<'ctx, crate::Double2, D>;
pub type DeviceArrayDefocus<'ctx, D> = DeviceArray<'ctx, crate::Defocus, D>;
pub type DeviceArrayProj2D<'ctx, D> = DeviceArray<'ctx, crate::Proj2D, D>;
pub type DeviceArrayVec3<'ctx, D> = DeviceArray<'ctx, crate::Vec3, D>;

pub type HostBufferSingle<'ctx, D> = HostStagingBuffer<'ctx, f32, D>;
pub type HostBufferDouble<'ctx, D> = HostStagingBuffer<'ctx, f64, D>;
pub type HostBufferFloat2<'ctx, D> = HostStagingBuffer<'ctx, crate::Float2, D>;
pub type HostBufferFloat4<'ctx, D> = HostStagingBuffer<'ctx, crate::Float4, D>;
pub type HostBufferDouble2<'ctx, D> = HostStagingBuffer<'ctx, crate::Double2, D>;
pub type HostBufferProj2D<'ctx, D> = HostStagingBuffer<'ctx, crate::Proj2D, D>;
pub type HostBufferDefocus<'ctx, D> = HostStagingBuffer<'ctx, crate::Defocus, D>;
