use super::bytes_of;
use crate::{
    common::Fallible, host_alloc, release_failed, Device, DeviceError, Driver, Element, HostPtr,
};
use log::{debug, warn};
use std::{
    marker::PhantomData,
    mem::size_of,
    ops::{Deref, DerefMut},
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// 锁页主存，用作与设备之间异步拷贝的中转。
///
/// 新分配的主存被清零。通过 [Deref] 访问内容时，应先同步写入它的队列。
pub struct HostStagingBuffer<'ctx, T: Element, D: Driver> {
    dev: &'ctx Device<D>,
    ptr: Option<HostPtr>,
    len: usize,
    _phantom: PhantomData<T>,
}

impl<'ctx, T: Element, D: Driver> HostStagingBuffer<'ctx, T, D> {
    #[inline]
    pub const fn new(dev: &'ctx Device<D>) -> Self {
        Self {
            dev,
            ptr: None,
            len: 0,
            _phantom: PhantomData,
        }
    }

    /// 分配 `numel` 个元素的锁页主存，先前持有的主存先被释放。
    pub fn alloc(&mut self, numel: usize) -> Result<(), DeviceError> {
        self.release()?;
        if numel == 0 {
            return Ok(());
        }
        let bytes = bytes_of::<T>(numel, true)?;
        let ptr = self
            .dev
            .driver()
            .malloc_host(self.dev.id(), bytes)
            .fail_with(|| host_alloc(format!("[{}x{numel} bytes]", size_of::<T>())))?;
        unsafe { ptr.as_ptr::<u8>().write_bytes(0, bytes) };
        debug!("{ptr:?} allocated {bytes} bytes for device {}", self.dev.id());
        self.ptr = Some(ptr);
        self.len = numel;
        Ok(())
    }

    /// 在主机上清零。
    #[inline]
    pub fn clear(&mut self) {
        self.fill(T::ZERO)
    }

    #[inline]
    pub const fn device(&self) -> &'ctx Device<D> {
        self.dev
    }

    #[inline]
    pub const fn bytes(&self) -> usize {
        self.len * size_of::<T>()
    }

    #[inline]
    pub const fn as_raw(&self) -> Option<HostPtr> {
        self.ptr
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.len = 0;
        if let Some(ptr) = self.ptr.take() {
            self.dev
                .driver()
                .free_host(self.dev.id(), ptr)
                .fail_with(|| release_failed(format!("{ptr:?}")))?;
            debug!("{ptr:?} released");
        }
        Ok(())
    }
}

impl<T: Element, D: Driver> Deref for HostStagingBuffer<'_, T, D> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        match self.ptr {
            Some(ptr) => unsafe { from_raw_parts(ptr.as_ptr::<T>(), self.len) },
            None => &[],
        }
    }
}

impl<T: Element, D: Driver> DerefMut for HostStagingBuffer<'_, T, D> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.ptr {
            Some(ptr) => unsafe { from_raw_parts_mut(ptr.as_ptr::<T>(), self.len) },
            None => &mut [],
        }
    }
}

impl<T: Element, D: Driver> Drop for HostStagingBuffer<'_, T, D> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{e}")
        }
    }
}

#[cfg(test)]
mod test {
    use super::HostStagingBuffer;
    use crate::{
        common_cpu::{Cpu, Op},
        Defocus, Device, DeviceErrorKind, Element, Proj2D,
    };

    #[test]
    fn test_alloc() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        let mut buf = HostStagingBuffer::<Proj2D, _>::new(&dev);
        assert!(buf.is_empty());
        assert!(buf.as_raw().is_none());

        buf.alloc(10).unwrap();
        assert_eq!(buf.len(), 10);
        assert!(buf.iter().all(|p| *p == Proj2D::ZERO));
        assert_eq!(buf.as_raw().unwrap().get() % 64, 0);

        buf[3].w = 2.5;
        buf.alloc(20).unwrap();
        assert_eq!(buf.len(), 20);
        assert_eq!(cpu.stats().host_blocks, 1);

        buf.alloc(0).unwrap();
        assert!(buf.is_empty());
        assert_eq!(cpu.stats().host_blocks, 0);
    }

    #[test]
    fn test_clear() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        let mut buf = HostStagingBuffer::<Defocus, _>::new(&dev);
        buf.clear();

        buf.alloc(5).unwrap();
        for d in buf.iter_mut() {
            d.u = 1.;
            d.score = -1.;
        }
        buf.clear();
        assert!(buf.iter().all(|d| *d == Defocus::ZERO));
    }

    #[test]
    fn test_alloc_failure() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        let mut buf = HostStagingBuffer::<f64, _>::new(&dev);
        cpu.fail_next(Op::MallocHost);
        let e = buf.alloc(3).unwrap_err();
        assert_eq!(e.kind, DeviceErrorKind::HostAlloc);
        assert!(e
            .to_string()
            .starts_with("Error allocating GPU-host memory [8x3 bytes]. GPU error: "));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unallocated_drop() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        drop(HostStagingBuffer::<f32, _>::new(&dev));
        assert_eq!(cpu.stats(), Default::default());
    }
}
