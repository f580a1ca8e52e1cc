use super::bytes_of;
use crate::{
    common::Fallible, device_alloc, device_mismatch, memory_clear, release_failed, DevPtr,
    Device, DeviceError, Driver, Element, QueueRaw, Stream,
};
use log::{debug, warn};
use std::{marker::PhantomData, mem::size_of};

/// 一段连续显存，存放 `len` 个 `T`。
///
/// 未分配时不持有任何显存。
pub struct DeviceArray<'ctx, T: Element, D: Driver> {
    dev: &'ctx Device<D>,
    ptr: Option<DevPtr>,
    len: usize,
    _phantom: PhantomData<T>,
}

impl<'ctx, T: Element, D: Driver> DeviceArray<'ctx, T, D> {
    #[inline]
    pub const fn new(dev: &'ctx Device<D>) -> Self {
        Self {
            dev,
            ptr: None,
            len: 0,
            _phantom: PhantomData,
        }
    }

    /// 分配 `numel` 个元素的显存，先前持有的显存先被释放。
    ///
    /// 不等待先前显存上的异步任务，调用者需要先同步。`numel` 为 0 时不持有显存。
    pub fn alloc(&mut self, numel: usize) -> Result<(), DeviceError> {
        self.release()?;
        if numel == 0 {
            return Ok(());
        }
        let bytes = bytes_of::<T>(numel, false)?;
        let ptr = self
            .dev
            .driver()
            .malloc(self.dev.id(), bytes)
            .fail_with(|| device_alloc(format!("[{}x{numel} bytes]", size_of::<T>())))?;
        debug!("{ptr:?} allocated {bytes} bytes on device {}", self.dev.id());
        self.ptr = Some(ptr);
        self.len = numel;
        Ok(())
    }

    /// 同步清零。
    pub fn clear(&mut self) -> Result<(), DeviceError> {
        self.memset(None)
    }

    /// 在 `stream` 上异步清零。
    pub fn clear_async(&mut self, stream: &Stream<D>) -> Result<(), DeviceError> {
        if stream.device().id() != self.dev.id() {
            return Err(device_mismatch(format!(
                "array on device {}, stream on device {}",
                self.dev.id(),
                stream.device().id()
            )));
        }
        self.memset(stream.raw())
    }

    fn memset(&mut self, queue: Option<QueueRaw>) -> Result<(), DeviceError> {
        let Some(ptr) = self.ptr else {
            return Ok(());
        };
        self.dev
            .driver()
            .memset_zero(self.dev.id(), ptr, self.bytes(), queue)
            .fail_with(|| memory_clear(format!("[{}x{} bytes]", size_of::<T>(), self.len)))
    }

    #[inline]
    pub const fn device(&self) -> &'ctx Device<D> {
        self.dev
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn bytes(&self) -> usize {
        self.len * size_of::<T>()
    }

    #[inline]
    pub const fn as_raw(&self) -> Option<DevPtr> {
        self.ptr
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.len = 0;
        if let Some(ptr) = self.ptr.take() {
            self.dev
                .driver()
                .free(self.dev.id(), ptr)
                .fail_with(|| release_failed(format!("{ptr:?}")))?;
            debug!("{ptr:?} released");
        }
        Ok(())
    }
}

impl<T: Element, D: Driver> Drop for DeviceArray<'_, T, D> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{e}")
        }
    }
}
