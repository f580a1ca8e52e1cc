mod common;
mod device;
mod handle;
mod memory;
mod sampler;
mod stream;
mod transfer;

pub mod fatal;
pub mod grid;

pub use common::*;
pub use device::{
    audit_requested_devices, count_devices, validate_requested_devices, Device, DeviceIdIssue,
};
pub use memory::*;
pub use sampler::*;
pub use stream::Stream;
pub use transfer::{copy_async, download_async, upload_async, Pending};

#[cfg(any(use_cpu, test))]
pub use handle::common_cpu;

#[cfg(use_cuda)]
pub use handle::nvidia_gpu;

/// 加速器驱动。
///
/// 资源层与平台之间唯一的接缝。所有调用显式指定设备序号，不依赖线程上的当前设备状态。
/// 句柄以不同的类型区分，空句柄用 [None] 表示，队列参数为 [None] 时表示设备的默认队列。
pub trait Driver {
    /// 可用设备数量。
    fn device_count(&self) -> Result<usize, DriverError>;
    /// 令设备在调用线程上可用。
    fn activate(&self, dev: u32) -> Result<(), DriverError>;
    /// 阻塞直到设备上所有任务完成。
    fn synchronize(&self, dev: u32) -> Result<(), DriverError>;
    /// 释放设备上的所有资源和状态。
    fn reset(&self, dev: u32) -> Result<(), DriverError>;

    /// 创建与默认队列互不阻塞的独立队列。
    fn queue_create(&self, dev: u32) -> Result<QueueRaw, DriverError>;
    fn queue_synchronize(&self, dev: u32, queue: Option<QueueRaw>) -> Result<(), DriverError>;
    fn queue_destroy(&self, dev: u32, queue: QueueRaw) -> Result<(), DriverError>;

    fn malloc(&self, dev: u32, bytes: usize) -> Result<DevPtr, DriverError>;
    fn free(&self, dev: u32, ptr: DevPtr) -> Result<(), DriverError>;
    /// 分配锁页主存，可被硬件直接访问。
    fn malloc_host(&self, dev: u32, bytes: usize) -> Result<HostPtr, DriverError>;
    fn free_host(&self, dev: u32, ptr: HostPtr) -> Result<(), DriverError>;

    /// 将显存清零。`queue` 为 [None] 时同步执行，否则在队列上异步执行。
    fn memset_zero(
        &self,
        dev: u32,
        ptr: DevPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError>;

    fn memcpy_h2d(
        &self,
        dev: u32,
        dst: DevPtr,
        src: HostPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError>;
    fn memcpy_d2h(
        &self,
        dev: u32,
        dst: HostPtr,
        src: DevPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError>;
    fn memcpy_d2d(
        &self,
        dev: u32,
        dst: DevPtr,
        src: DevPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError>;

    fn array_create(&self, dev: u32, desc: &ArrayDesc) -> Result<ArrayRaw, DriverError>;
    fn array_destroy(&self, dev: u32, array: ArrayRaw) -> Result<(), DriverError>;
    fn texture_create(
        &self,
        dev: u32,
        array: ArrayRaw,
        desc: &TextureDesc,
    ) -> Result<TextureRaw, DriverError>;
    fn texture_destroy(&self, dev: u32, texture: TextureRaw) -> Result<(), DriverError>;
    fn surface_create(&self, dev: u32, array: ArrayRaw) -> Result<SurfaceRaw, DriverError>;
    fn surface_destroy(&self, dev: u32, surface: SurfaceRaw) -> Result<(), DriverError>;
}
