//! 以主存模拟的加速器。
//!
//! 队列中的命令在同步时才执行，因此可以观察到未同步就读取结果、释放仍在使用的存储等误用。

mod machine;

use crate::{
    ArrayDesc, ArrayRaw, DevPtr, Driver, DriverError, HostPtr, QueueRaw, SurfaceRaw, TextureDesc,
    TextureRaw,
};
use log::debug;
use machine::{
    errors::{invalid_handle, invalid_value},
    Array, Command, Machine, Queue, Space, View,
};
use std::sync::{Arc, Mutex, MutexGuard};

/// 驱动操作，用于注入故障。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Op {
    DeviceCount,
    Activate,
    Synchronize,
    Reset,
    QueueCreate,
    QueueSynchronize,
    Malloc,
    MallocHost,
    Memset,
    Memcpy,
    ArrayCreate,
    TextureCreate,
    SurfaceCreate,
}

/// 存活资源计数。
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Stats {
    pub device_blocks: usize,
    pub host_blocks: usize,
    pub queues: usize,
    pub arrays: usize,
    pub textures: usize,
    pub surfaces: usize,
    /// 累计的显存分配次数。
    pub device_allocations: usize,
}

/// 模拟加速器的驱动，克隆得到的驱动共享同一组设备。
#[derive(Clone)]
pub struct Cpu(Arc<Mutex<Machine>>);

impl Default for Cpu {
    #[inline]
    fn default() -> Self {
        Self::new(1)
    }
}

impl Cpu {
    pub fn new(devices: usize) -> Self {
        Self(Arc::new(Mutex::new(Machine::new(devices))))
    }

    /// 令下一次 `op` 操作失败。
    pub fn fail_next(&self, op: Op) {
        self.lock().faults.insert(op);
    }

    pub fn stats(&self) -> Stats {
        let m = self.lock();
        Stats {
            device_blocks: m.device_mem.len(),
            host_blocks: m.host_mem.len(),
            queues: m.queues.len(),
            arrays: m.arrays.len(),
            textures: m.textures.len(),
            surfaces: m.surfaces.len(),
            device_allocations: m.allocations,
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.0.lock().unwrap()
    }

    fn submit(&self, dev: u32, cmd: Command, queue: Option<QueueRaw>) -> Result<(), DriverError> {
        let mut m = self.lock();
        m.check(dev, &cmd)?;
        match queue {
            None => m.execute(dev, cmd),
            Some(queue) => match m.queues.get_mut(&queue.get()) {
                Some(q) if q.dev == dev => {
                    q.pending.push(cmd);
                    Ok(())
                }
                _ => Err(invalid_handle(format!("{queue:?}"))),
            },
        }
    }
}

impl Driver for Cpu {
    fn device_count(&self) -> Result<usize, DriverError> {
        let mut m = self.lock();
        m.enter(None, Op::DeviceCount)?;
        Ok(m.devices)
    }

    fn activate(&self, dev: u32) -> Result<(), DriverError> {
        self.lock().enter(Some(dev), Op::Activate)
    }

    fn synchronize(&self, dev: u32) -> Result<(), DriverError> {
        let mut m = self.lock();
        m.enter(Some(dev), Op::Synchronize)?;
        m.drain_device(dev)
    }

    fn reset(&self, dev: u32) -> Result<(), DriverError> {
        let mut m = self.lock();
        m.enter(Some(dev), Op::Reset)?;
        m.reset(dev);
        debug!("device {dev} reset");
        Ok(())
    }

    fn queue_create(&self, dev: u32) -> Result<QueueRaw, DriverError> {
        let mut m = self.lock();
        m.enter(Some(dev), Op::QueueCreate)?;
        let id = m.handle();
        m.queues.insert(
            id,
            Queue {
                dev,
                order: id,
                pending: Vec::new(),
            },
        );
        Ok(QueueRaw::new(id).unwrap())
    }

    fn queue_synchronize(&self, dev: u32, queue: Option<QueueRaw>) -> Result<(), DriverError> {
        let mut m = self.lock();
        m.enter(Some(dev), Op::QueueSynchronize)?;
        // 默认队列上的命令在提交时已执行
        let Some(queue) = queue else {
            return Ok(());
        };
        if !m.queues.get(&queue.get()).is_some_and(|q| q.dev == dev) {
            return Err(invalid_handle(format!("{queue:?}")));
        }
        m.drain(queue.get())
    }

    fn queue_destroy(&self, dev: u32, queue: QueueRaw) -> Result<(), DriverError> {
        let mut m = self.lock();
        if !m.queues.get(&queue.get()).is_some_and(|q| q.dev == dev) {
            return Err(invalid_handle(format!("{queue:?}")));
        }
        // 销毁前完成积压的命令
        let result = m.drain(queue.get());
        m.queues.remove(&queue.get());
        result
    }

    fn malloc(&self, dev: u32, bytes: usize) -> Result<DevPtr, DriverError> {
        let mut m = self.lock();
        m.enter(Some(dev), Op::Malloc)?;
        let addr = m.alloc(dev, bytes, false)?;
        Ok(DevPtr::new(addr).unwrap())
    }

    fn free(&self, dev: u32, ptr: DevPtr) -> Result<(), DriverError> {
        self.lock().release(dev, ptr.get(), false)
    }

    fn malloc_host(&self, dev: u32, bytes: usize) -> Result<HostPtr, DriverError> {
        let mut m = self.lock();
        m.enter(Some(dev), Op::MallocHost)?;
        let addr = m.alloc(dev, bytes, true)?;
        Ok(HostPtr::new(addr).unwrap())
    }

    fn free_host(&self, dev: u32, ptr: HostPtr) -> Result<(), DriverError> {
        self.lock().release(dev, ptr.get(), true)
    }

    fn memset_zero(
        &self,
        dev: u32,
        ptr: DevPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError> {
        self.lock().enter(Some(dev), Op::Memset)?;
        let cmd = Command::Zero {
            dst: ptr.get(),
            bytes,
        };
        self.submit(dev, cmd, queue)
    }

    fn memcpy_h2d(
        &self,
        dev: u32,
        dst: DevPtr,
        src: HostPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError> {
        self.lock().enter(Some(dev), Op::Memcpy)?;
        let cmd = Command::Copy {
            dst: Space::Device(dst.get()),
            src: Space::Host(src.get()),
            bytes,
        };
        self.submit(dev, cmd, queue)
    }

    fn memcpy_d2h(
        &self,
        dev: u32,
        dst: HostPtr,
        src: DevPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError> {
        self.lock().enter(Some(dev), Op::Memcpy)?;
        let cmd = Command::Copy {
            dst: Space::Host(dst.get()),
            src: Space::Device(src.get()),
            bytes,
        };
        self.submit(dev, cmd, queue)
    }

    fn memcpy_d2d(
        &self,
        dev: u32,
        dst: DevPtr,
        src: DevPtr,
        bytes: usize,
        queue: Option<QueueRaw>,
    ) -> Result<(), DriverError> {
        self.lock().enter(Some(dev), Op::Memcpy)?;
        let cmd = Command::Copy {
            dst: Space::Device(dst.get()),
            src: Space::Device(src.get()),
            bytes,
        };
        self.submit(dev, cmd, queue)
    }

    fn array_create(&self, dev: u32, desc: &ArrayDesc) -> Result<ArrayRaw, DriverError> {
        let mut m = self.lock();
        m.enter(Some(dev), Op::ArrayCreate)?;
        Machine::check_array(desc)?;
        let id = m.handle();
        m.arrays.insert(id, Array { dev, desc: *desc });
        Ok(ArrayRaw::new(id).unwrap())
    }

    fn array_destroy(&self, dev: u32, array: ArrayRaw) -> Result<(), DriverError> {
        let mut m = self.lock();
        let id = array.get();
        if !m.arrays.get(&id).is_some_and(|a| a.dev == dev) {
            return Err(invalid_handle(format!("{array:?}")));
        }
        if m.textures.values().chain(m.surfaces.values()).any(|v| v.array == id) {
            return Err(invalid_value("array still has bound views"));
        }
        m.arrays.remove(&id);
        Ok(())
    }

    fn texture_create(
        &self,
        dev: u32,
        array: ArrayRaw,
        _desc: &TextureDesc,
    ) -> Result<TextureRaw, DriverError> {
        let mut m = self.lock();
        m.enter(Some(dev), Op::TextureCreate)?;
        if !m.arrays.get(&array.get()).is_some_and(|a| a.dev == dev) {
            return Err(invalid_handle(format!("{array:?}")));
        }
        let id = m.handle();
        m.textures.insert(
            id,
            View {
                dev,
                array: array.get(),
            },
        );
        Ok(TextureRaw::new(id).unwrap())
    }

    fn texture_destroy(&self, dev: u32, texture: TextureRaw) -> Result<(), DriverError> {
        let mut m = self.lock();
        if !m.textures.get(&texture.get()).is_some_and(|v| v.dev == dev) {
            return Err(invalid_handle(format!("{texture:?}")));
        }
        m.textures.remove(&texture.get());
        Ok(())
    }

    fn surface_create(&self, dev: u32, array: ArrayRaw) -> Result<SurfaceRaw, DriverError> {
        let mut m = self.lock();
        m.enter(Some(dev), Op::SurfaceCreate)?;
        let Some(a) = m.arrays.get(&array.get()).filter(|a| a.dev == dev) else {
            return Err(invalid_handle(format!("{array:?}")));
        };
        if !a.desc.surface_load_store {
            return Err(invalid_value("array does not allow surface load/store"));
        }
        let id = m.handle();
        m.surfaces.insert(
            id,
            View {
                dev,
                array: array.get(),
            },
        );
        Ok(SurfaceRaw::new(id).unwrap())
    }

    fn surface_destroy(&self, dev: u32, surface: SurfaceRaw) -> Result<(), DriverError> {
        let mut m = self.lock();
        if !m.surfaces.get(&surface.get()).is_some_and(|v| v.dev == dev) {
            return Err(invalid_handle(format!("{surface:?}")));
        }
        m.surfaces.remove(&surface.get());
        Ok(())
    }
}
