//! 队列上的异步拷贝。
//!
//! 拷贝在提交后立即返回，同步队列之后目标中的数据才有效。
//! 涉及锁页主存的拷贝返回 [`Pending`]，主存缓冲在它同步或丢弃之前保持借用。

use crate::{
    common::Fallible, device_mismatch, out_of_range, transfer_failed, DeviceArray, DeviceError,
    Driver, HostStagingBuffer, Stream, Transfer,
};
use log::warn;
use std::mem::{forget, size_of};

/// 拷贝一端：所在设备和容量。
struct Endpoint {
    dev: u32,
    len: usize,
}

fn check(numel: usize, dst: Endpoint, src: Endpoint, queue_dev: u32) -> Result<(), DeviceError> {
    if dst.dev != src.dev || dst.dev != queue_dev {
        return Err(device_mismatch(format!(
            "destination on device {}, source on device {}, stream on device {queue_dev}",
            dst.dev, src.dev,
        )));
    }
    if numel > dst.len || numel > src.len {
        return Err(out_of_range(format!(
            "[{numel} elements, destination holds {}, source holds {}]",
            dst.len, src.len,
        )));
    }
    Ok(())
}

fn info<T>(numel: usize) -> String {
    format!("[{}x{numel} bytes]", size_of::<T>())
}

/// 已提交但未完成的主存拷贝。
///
/// 借用着拷贝涉及的主存缓冲，丢弃时同步队列。
#[must_use = "the host buffer is not valid until the stream is synchronized"]
pub struct Pending<'a, 'ctx, D: Driver> {
    stream: &'a Stream<'ctx, D>,
}

impl<D: Driver> Pending<'_, '_, D> {
    /// 同步队列并归还主存缓冲。
    pub fn sync(self) -> Result<(), DeviceError> {
        let stream = self.stream;
        forget(self);
        stream.sync()
    }
}

impl<D: Driver> Drop for Pending<'_, '_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.stream.sync() {
            warn!("{e}")
        }
    }
}

/// 从锁页主存上传 `numel` 个元素到显存。
///
/// 拷贝完成前 `src` 不可修改。
pub fn upload_async<'a, 'ctx, T: Transfer, D: Driver>(
    dst: &mut DeviceArray<'ctx, T, D>,
    src: &'a HostStagingBuffer<'ctx, T, D>,
    numel: usize,
    stream: &'a Stream<'ctx, D>,
) -> Result<Pending<'a, 'ctx, D>, DeviceError> {
    check(
        numel,
        Endpoint {
            dev: dst.device().id(),
            len: dst.len(),
        },
        Endpoint {
            dev: src.device().id(),
            len: src.len(),
        },
        stream.device().id(),
    )?;
    if let (Some(d), Some(s)) = (dst.as_raw(), src.as_raw()) {
        let dev = stream.device();
        dev.driver()
            .memcpy_h2d(dev.id(), d, s, numel * size_of::<T>(), stream.raw())
            .fail_with(|| transfer_failed(info::<T>(numel)))?
    }
    Ok(Pending { stream })
}

/// 从显存下载 `numel` 个元素到锁页主存。
///
/// 拷贝完成前 `dst` 不可读写：
///
/// ```compile_fail
/// use gpu_resources::{
///     common_cpu::Cpu, download_async, Device, DeviceArray, HostStagingBuffer, Stream,
/// };
///
/// let dev = Device::select(Cpu::default(), 0).unwrap();
/// let stream = Stream::new(&dev);
/// let mut host = HostStagingBuffer::<f32, _>::new(&dev);
/// let mut array = DeviceArray::<f32, _>::new(&dev);
/// host.alloc(4).unwrap();
/// array.alloc(4).unwrap();
/// let pending = download_async(&mut host, &array, 4, &stream).unwrap();
/// let _ = host[0];
/// pending.sync().unwrap();
/// ```
pub fn download_async<'a, 'ctx, T: Transfer, D: Driver>(
    dst: &'a mut HostStagingBuffer<'ctx, T, D>,
    src: &DeviceArray<'ctx, T, D>,
    numel: usize,
    stream: &'a Stream<'ctx, D>,
) -> Result<Pending<'a, 'ctx, D>, DeviceError> {
    check(
        numel,
        Endpoint {
            dev: dst.device().id(),
            len: dst.len(),
        },
        Endpoint {
            dev: src.device().id(),
            len: src.len(),
        },
        stream.device().id(),
    )?;
    if let (Some(d), Some(s)) = (dst.as_raw(), src.as_raw()) {
        let dev = stream.device();
        dev.driver()
            .memcpy_d2h(dev.id(), d, s, numel * size_of::<T>(), stream.raw())
            .fail_with(|| transfer_failed(info::<T>(numel)))?
    }
    Ok(Pending { stream })
}

/// 在显存之间拷贝 `numel` 个元素。
pub fn copy_async<T: Transfer, D: Driver>(
    dst: &mut DeviceArray<T, D>,
    src: &DeviceArray<T, D>,
    numel: usize,
    stream: &Stream<D>,
) -> Result<(), DeviceError> {
    check(
        numel,
        Endpoint {
            dev: dst.device().id(),
            len: dst.len(),
        },
        Endpoint {
            dev: src.device().id(),
            len: src.len(),
        },
        stream.device().id(),
    )?;
    let (Some(d), Some(s)) = (dst.as_raw(), src.as_raw()) else {
        return Ok(());
    };
    let dev = stream.device();
    dev.driver()
        .memcpy_d2d(dev.id(), d, s, numel * size_of::<T>(), stream.raw())
        .fail_with(|| transfer_failed(info::<T>(numel)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        as_bytes,
        common_cpu::{Cpu, Op},
        Defocus, Device, DeviceErrorKind, Double2, Float2, Float4, Proj2D,
    };
    use rand::Rng;

    fn round_trip<T: Transfer>(numel: usize) {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        let mut stream = Stream::new(&dev);
        stream.configure().unwrap();

        let mut src = HostStagingBuffer::<T, _>::new(&dev);
        let mut dst = HostStagingBuffer::<T, _>::new(&dev);
        let mut a = DeviceArray::<T, _>::new(&dev);
        let mut b = DeviceArray::<T, _>::new(&dev);
        src.alloc(numel).unwrap();
        dst.alloc(numel).unwrap();
        a.alloc(numel).unwrap();
        b.alloc(numel).unwrap();

        let bytes = unsafe {
            std::slice::from_raw_parts_mut(src.as_raw().unwrap().as_ptr::<u8>(), src.bytes())
        };
        rand::rng().fill(bytes);

        let upload = upload_async(&mut a, &src, numel, &stream).unwrap();
        copy_async(&mut b, &a, numel, &stream).unwrap();
        let download = download_async(&mut dst, &b, numel, &stream).unwrap();
        upload.sync().unwrap();
        download.sync().unwrap();
        assert_eq!(as_bytes(&dst), as_bytes(&src));
    }

    macro_rules! round_trip {
        ($( $name:ident: $ty:ty; )+) => {
            $(
                #[test]
                fn $name() {
                    round_trip::<$ty>(1);
                    round_trip::<$ty>(257);
                }
            )+
        };
    }

    round_trip! {
        test_round_trip_f32:     f32;
        test_round_trip_f64:     f64;
        test_round_trip_float2:  Float2;
        test_round_trip_float4:  Float4;
        test_round_trip_double2: Double2;
        test_round_trip_proj2d:  Proj2D;
        test_round_trip_defocus: Defocus;
    }

    #[test]
    fn test_float2_exact() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        let mut stream = Stream::new(&dev);
        stream.configure().unwrap();

        let original = [
            Float2 { x: 1.5, y: -0.0 },
            Float2 { x: f32::MIN_POSITIVE, y: 3.0e-42 },
            Float2 { x: f32::MAX, y: f32::EPSILON },
            Float2 { x: -7.25, y: 1. / 3. },
        ];
        let mut host = HostStagingBuffer::<Float2, _>::new(&dev);
        let mut fresh = HostStagingBuffer::<Float2, _>::new(&dev);
        let mut array = DeviceArray::<Float2, _>::new(&dev);
        host.alloc(4).unwrap();
        fresh.alloc(4).unwrap();
        array.alloc(4).unwrap();
        host.copy_from_slice(&original);

        upload_async(&mut array, &host, 4, &stream)
            .unwrap()
            .sync()
            .unwrap();
        download_async(&mut fresh, &array, 4, &stream)
            .unwrap()
            .sync()
            .unwrap();
        for (a, b) in fresh.iter().zip(&original) {
            assert_eq!(a.x.to_bits(), b.x.to_bits());
            assert_eq!(a.y.to_bits(), b.y.to_bits());
        }
    }

    #[test]
    fn test_drop_pending_synchronizes() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        let mut stream = Stream::new(&dev);
        stream.configure().unwrap();

        let mut host = HostStagingBuffer::<f32, _>::new(&dev);
        let mut array = DeviceArray::<f32, _>::new(&dev);
        host.alloc(8).unwrap();
        array.alloc(8).unwrap();
        host.fill(2.);

        drop(upload_async(&mut array, &host, 8, &stream).unwrap());
        host.clear();
        let pending = download_async(&mut host, &array, 8, &stream).unwrap();
        drop(pending);
        assert!(host.iter().all(|&x| x == 2.));
    }

    #[test]
    fn test_pending_sync_failure() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        let mut stream = Stream::new(&dev);
        stream.configure().unwrap();

        let mut host = HostStagingBuffer::<f32, _>::new(&dev);
        let mut array = DeviceArray::<f32, _>::new(&dev);
        host.alloc(4).unwrap();
        array.alloc(4).unwrap();

        let pending = upload_async(&mut array, &host, 4, &stream).unwrap();
        cpu.fail_next(Op::QueueSynchronize);
        let e = pending.sync().unwrap_err();
        assert_eq!(e.kind, DeviceErrorKind::StreamSync);
        stream.sync().unwrap();
    }

    #[test]
    fn test_default_stream() {
        let cpu = Cpu::default();
        let dev = Device::select(cpu.clone(), 0).unwrap();
        let stream = Stream::new(&dev);

        let mut host = HostStagingBuffer::<f64, _>::new(&dev);
        let mut array = DeviceArray::<f64, _>::new(&dev);
        host.alloc(3).unwrap();
        array.alloc(3).unwrap();
        host.copy_from_slice(&[1., 2., 3.]);
        upload_async(&mut array, &host, 3, &stream)
            .unwrap()
            .sync()
            .unwrap();
        host.clear();
        download_async(&mut host, &array, 2, &stream)
            .unwrap()
            .sync()
            .unwrap();
        assert_eq!(&*host, &[1., 2., 0.]);
    }

    #[test]
    fn test_checks() {
        let cpu = Cpu::new(2);
        let dev0 = Device::select(cpu.clone(), 0).unwrap();
        let dev1 = Device::select(cpu.clone(), 1).unwrap();
        let stream0 = Stream::new(&dev0);
        let stream1 = Stream::new(&dev1);

        let mut host = HostStagingBuffer::<f32, _>::new(&dev0);
        let mut array = DeviceArray::<f32, _>::new(&dev0);
        host.alloc(4).unwrap();
        array.alloc(8).unwrap();

        let e = upload_async(&mut array, &host, 5, &stream0).err().unwrap();
        assert_eq!(e.kind, DeviceErrorKind::OutOfRange);
        let e = download_async(&mut host, &array, 5, &stream0).err().unwrap();
        assert_eq!(e.kind, DeviceErrorKind::OutOfRange);
        let e = upload_async(&mut array, &host, 4, &stream1).err().unwrap();
        assert_eq!(e.kind, DeviceErrorKind::DeviceMismatch);

        let empty = DeviceArray::<f32, _>::new(&dev0);
        copy_async(&mut array, &empty, 0, &stream0).unwrap();
        let e = copy_async(&mut array, &empty, 1, &stream0).unwrap_err();
        assert_eq!(e.kind, DeviceErrorKind::OutOfRange);

        cpu.fail_next(Op::Memcpy);
        let e = upload_async(&mut array, &host, 4, &stream0).err().unwrap();
        assert_eq!(e.kind, DeviceErrorKind::Transfer);
        assert!(e.to_string().starts_with("Error copying GPU memory [4x4 bytes]"));
    }
}
