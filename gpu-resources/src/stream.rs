use crate::{
    common::Fallible, release_failed, stream_create, stream_sync, Device, DeviceError, Driver,
    QueueRaw,
};
use log::{debug, warn};

/// 独立的异步执行队列。
///
/// 未配置时代表设备的默认队列。
pub struct Stream<'ctx, D: Driver> {
    dev: &'ctx Device<D>,
    raw: Option<QueueRaw>,
}

impl<'ctx, D: Driver> Stream<'ctx, D> {
    #[inline]
    pub const fn new(dev: &'ctx Device<D>) -> Self {
        Self { dev, raw: None }
    }

    /// 创建一个不与默认队列同步的队列，已有的队列先被释放。
    pub fn configure(&mut self) -> Result<(), DeviceError> {
        self.release()?;
        let raw = self
            .dev
            .driver()
            .queue_create(self.dev.id())
            .fail_with(|| stream_create(""))?;
        debug!("{raw:?} created on device {}", self.dev.id());
        self.raw = Some(raw);
        Ok(())
    }

    /// 阻塞直到队列中的任务全部完成。
    pub fn sync(&self) -> Result<(), DeviceError> {
        self.dev
            .driver()
            .queue_synchronize(self.dev.id(), self.raw)
            .fail_with(|| stream_sync(""))
    }

    #[inline]
    pub const fn device(&self) -> &'ctx Device<D> {
        self.dev
    }

    #[inline]
    pub const fn raw(&self) -> Option<QueueRaw> {
        self.raw
    }

    #[inline]
    pub const fn is_configured(&self) -> bool {
        self.raw.is_some()
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        if let Some(raw) = self.raw.take() {
            self.dev
                .driver()
                .queue_destroy(self.dev.id(), raw)
                .fail_with(|| release_failed(format!("{raw:?}")))?;
            debug!("{raw:?} destroyed");
        }
        Ok(())
    }
}

impl<D: Driver> Drop for Stream<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{e}")
        }
    }
}

#[cfg(test)]
mod test {
    use super::Stream;
    use crate::{
        common_cpu::{Cpu, Op},
        Device, DeviceErrorKind,
    };

    #[test]
    fn test_lifecycle() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        {
            let mut stream = Stream::new(&dev);
            assert!(!stream.is_configured());
            stream.sync().unwrap();

            stream.configure().unwrap();
            let first = stream.raw();
            stream.configure().unwrap();
            assert_ne!(stream.raw(), first);
            assert_eq!(cpu.stats().queues, 1);
            stream.sync().unwrap();
        }
        assert_eq!(cpu.stats().queues, 0);
    }

    #[test]
    fn test_unconfigured_drop() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        drop(Stream::new(&dev));
        assert_eq!(cpu.stats().queues, 0);
    }

    #[test]
    fn test_create_failure() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        let mut stream = Stream::new(&dev);
        cpu.fail_next(Op::QueueCreate);
        let e = stream.configure().unwrap_err();
        assert_eq!(e.kind, DeviceErrorKind::StreamCreate);
        assert!(!stream.is_configured());

        stream.configure().unwrap();
        cpu.fail_next(Op::QueueSynchronize);
        assert_eq!(stream.sync().unwrap_err().kind, DeviceErrorKind::StreamSync);
    }
}
