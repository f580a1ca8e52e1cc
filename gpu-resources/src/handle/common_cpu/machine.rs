use super::Op;
use crate::{ArrayDesc, DriverError};
use digit_layout::types as ty;
use log::warn;
use rayon::{iter::ParallelIterator, slice::ParallelSliceMut};
use std::{
    alloc::{alloc, dealloc, Layout},
    collections::{HashMap, HashSet},
    ptr::NonNull,
};

pub(super) const DEVICE_ALIGNMENT: usize = 256;
pub(super) const HOST_ALIGNMENT: usize = 64;

const CLEAR_CHUNK: usize = 1 << 16;

/// 模拟的硬件状态。
pub(super) struct Machine {
    pub devices: usize,
    pub device_mem: HashMap<u64, Block>,
    pub host_mem: HashMap<u64, Block>,
    pub queues: HashMap<u64, Queue>,
    pub arrays: HashMap<u64, Array>,
    pub textures: HashMap<u64, View>,
    pub surfaces: HashMap<u64, View>,
    pub faults: HashSet<Op>,
    pub allocations: usize,
    /// 释放时仍有命令积压的块，保留到积压清空，地址不会被新分配复用。
    retired: Vec<Block>,
    next_handle: u64,
}

pub(super) struct Block {
    pub dev: u32,
    ptr: NonNull<u8>,
    layout: Layout,
}

// 块只在持有机器锁时被访问。
unsafe impl Send for Block {}

pub(super) struct Queue {
    pub dev: u32,
    pub order: u64,
    pub pending: Vec<Command>,
}

pub(super) struct Array {
    pub dev: u32,
    pub desc: ArrayDesc,
}

pub(super) struct View {
    pub dev: u32,
    pub array: u64,
}

#[derive(Clone, Copy, Debug)]
pub(super) enum Space {
    Device(u64),
    Host(u64),
}

#[derive(Clone, Copy, Debug)]
pub(super) enum Command {
    Zero { dst: u64, bytes: usize },
    Copy { dst: Space, src: Space, bytes: usize },
}

pub(super) mod errors {
    use crate::DriverError;

    #[inline]
    pub fn invalid_value(info: impl AsRef<str>) -> DriverError {
        DriverError::new(1, format!("invalid argument: {}", info.as_ref()))
    }

    #[inline]
    pub fn out_of_memory() -> DriverError {
        DriverError::new(2, "out of memory")
    }

    #[inline]
    pub fn invalid_device() -> DriverError {
        DriverError::new(101, "invalid device ordinal")
    }

    #[inline]
    pub fn invalid_handle(info: impl AsRef<str>) -> DriverError {
        DriverError::new(400, format!("invalid resource handle: {}", info.as_ref()))
    }

    #[inline]
    pub fn not_supported(info: impl AsRef<str>) -> DriverError {
        DriverError::new(801, format!("operation not supported: {}", info.as_ref()))
    }
}

use errors::*;

impl Block {
    fn new(dev: u32, bytes: usize, align: usize) -> Result<Self, DriverError> {
        if bytes == 0 {
            return Err(invalid_value("zero-sized allocation"));
        }
        let layout = Layout::from_size_align(bytes, align).map_err(|_| out_of_memory())?;
        let ptr = NonNull::new(unsafe { alloc(layout) }).ok_or_else(out_of_memory)?;
        Ok(Self { dev, ptr, layout })
    }

    #[inline]
    pub fn addr(&self) -> u64 {
        self.ptr.as_ptr() as usize as _
    }

    #[inline]
    fn contains(&self, addr: u64, bytes: usize) -> bool {
        let base = self.addr();
        addr >= base && addr - base + bytes as u64 <= self.layout.size() as u64
    }
}

impl Drop for Block {
    #[inline]
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl Machine {
    pub fn new(devices: usize) -> Self {
        Self {
            devices,
            device_mem: HashMap::new(),
            host_mem: HashMap::new(),
            queues: HashMap::new(),
            arrays: HashMap::new(),
            textures: HashMap::new(),
            surfaces: HashMap::new(),
            faults: HashSet::new(),
            allocations: 0,
            retired: Vec::new(),
            next_handle: 1,
        }
    }

    /// 检查设备序号并触发注入的故障。
    pub fn enter(&mut self, dev: Option<u32>, op: Op) -> Result<(), DriverError> {
        if let Some(dev) = dev {
            if dev as usize >= self.devices {
                return Err(invalid_device());
            }
        }
        if self.faults.remove(&op) {
            warn!("injected fault triggered by {op:?}");
            return Err(DriverError::new(999, format!("injected fault in {op:?}")));
        }
        Ok(())
    }

    #[inline]
    pub fn handle(&mut self) -> u64 {
        let ans = self.next_handle;
        self.next_handle += 1;
        ans
    }

    pub fn alloc(&mut self, dev: u32, bytes: usize, host: bool) -> Result<u64, DriverError> {
        let block = if host {
            Block::new(dev, bytes, HOST_ALIGNMENT)?
        } else {
            Block::new(dev, bytes, DEVICE_ALIGNMENT)?
        };
        let addr = block.addr();
        if host {
            self.host_mem.insert(addr, block);
        } else {
            self.allocations += 1;
            self.device_mem.insert(addr, block);
        }
        Ok(addr)
    }

    pub fn release(&mut self, dev: u32, addr: u64, host: bool) -> Result<(), DriverError> {
        let busy = self.queues.values().any(|q| !q.pending.is_empty());
        let mem = if host {
            &mut self.host_mem
        } else {
            &mut self.device_mem
        };
        match mem.get(&addr) {
            Some(block) if block.dev == dev => {
                if let Some(block) = mem.remove(&addr) {
                    if busy {
                        self.retired.push(block)
                    }
                }
                Ok(())
            }
            _ => Err(invalid_value(format!("{addr:#x} is not an allocated block"))),
        }
    }

    fn locate(&self, dev: u32, space: Space, bytes: usize) -> Result<*mut u8, DriverError> {
        let (mem, addr) = match space {
            Space::Device(addr) => (&self.device_mem, addr),
            Space::Host(addr) => (&self.host_mem, addr),
        };
        mem.values()
            .find(|block| block.dev == dev && block.contains(addr, bytes))
            .map(|_| addr as usize as *mut u8)
            .ok_or_else(|| invalid_value(format!("{space:?} does not cover {bytes} bytes")))
    }

    /// 检查命令访问的存储区域是否有效。
    pub fn check(&self, dev: u32, cmd: &Command) -> Result<(), DriverError> {
        match *cmd {
            Command::Zero { dst, bytes } => self.locate(dev, Space::Device(dst), bytes).map(drop),
            Command::Copy { dst, src, bytes } => {
                self.locate(dev, dst, bytes)?;
                self.locate(dev, src, bytes).map(drop)
            }
        }
    }

    pub fn execute(&self, dev: u32, cmd: Command) -> Result<(), DriverError> {
        match cmd {
            Command::Zero { dst, bytes } => {
                let dst = self.locate(dev, Space::Device(dst), bytes)?;
                let dst = unsafe { std::slice::from_raw_parts_mut(dst, bytes) };
                dst.par_chunks_mut(CLEAR_CHUNK).for_each(|chunk| chunk.fill(0));
            }
            Command::Copy { dst, src, bytes } => {
                let dst = self.locate(dev, dst, bytes)?;
                let src = self.locate(dev, src, bytes)?;
                unsafe { std::ptr::copy(src, dst, bytes) }
            }
        }
        Ok(())
    }

    /// 执行队列中积压的全部命令，返回遇到的第一个错误。
    pub fn drain(&mut self, queue: u64) -> Result<(), DriverError> {
        let Some(q) = self.queues.get_mut(&queue) else {
            return Err(invalid_handle(format!("queue {queue}")));
        };
        let dev = q.dev;
        let pending = std::mem::take(&mut q.pending);
        let mut result = Ok(());
        for cmd in pending {
            if let Err(e) = self.execute(dev, cmd) {
                if result.is_ok() {
                    result = Err(e)
                }
            }
        }
        if self.queues.values().all(|q| q.pending.is_empty()) {
            self.retired.clear()
        }
        result
    }

    pub fn drain_device(&mut self, dev: u32) -> Result<(), DriverError> {
        let mut queues = self
            .queues
            .iter()
            .filter(|(_, q)| q.dev == dev)
            .map(|(&id, q)| (q.order, id))
            .collect::<Vec<_>>();
        queues.sort_unstable();

        let mut result = Ok(());
        for (_, id) in queues {
            if let Err(e) = self.drain(id) {
                if result.is_ok() {
                    result = Err(e)
                }
            }
        }
        result
    }

    pub fn check_array(desc: &ArrayDesc) -> Result<(), DriverError> {
        let ArrayDesc {
            extent,
            format,
            layered,
            ..
        } = desc;
        if format.scalar != ty::F32 && format.scalar != ty::U32 {
            return Err(not_supported(format!("channel type {:?}", format.scalar)));
        }
        if !matches!(format.channels, 1 | 2 | 4) {
            return Err(invalid_value(format!("{} channels", format.channels)));
        }
        if extent.width == 0 || extent.height == 0 || (*layered && extent.depth == 0) {
            return Err(invalid_value(format!("array extent {extent:?}")));
        }
        Ok(())
    }

    /// 丢弃设备拥有的全部资源。
    pub fn reset(&mut self, dev: u32) {
        self.device_mem.retain(|_, b| b.dev != dev);
        self.host_mem.retain(|_, b| b.dev != dev);
        self.queues.retain(|_, q| q.dev != dev);
        self.arrays.retain(|_, a| a.dev != dev);
        self.textures.retain(|_, v| v.dev != dev);
        self.surfaces.retain(|_, v| v.dev != dev);
        if self.queues.values().all(|q| q.pending.is_empty()) {
            self.retired.clear()
        }
    }
}
