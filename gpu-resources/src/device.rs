use crate::{
    common::Fallible, device_query, device_reset, device_select, device_sync, DeviceError, Driver,
};
use log::{debug, error};
use std::fmt;

/// 选定的加速器。
///
/// 所有资源都借用一个设备上下文创建，资源操作总是作用于创建它的设备。
pub struct Device<D> {
    driver: D,
    id: u32,
}

impl<D: Driver> Device<D> {
    /// 选择 `id` 号设备。
    pub fn select(driver: D, id: u32) -> Result<Self, DeviceError> {
        driver
            .activate(id)
            .fail_with(|| device_select(format!("{id}")))?;
        debug!("device {id} selected");
        Ok(Self { driver, id })
    }

    #[inline]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// 阻塞直到设备上所有任务完成。
    pub fn synchronize(&self) -> Result<(), DeviceError> {
        self.driver
            .synchronize(self.id)
            .fail_with(|| device_sync(format!("{}", self.id)))
    }

    /// 释放设备上的全部状态。
    ///
    /// 需要独占设备，因此所有借用设备的资源必须先被释放：
    ///
    /// ```compile_fail
    /// use gpu_resources::{common_cpu::Cpu, Device, HostStagingBuffer};
    ///
    /// let mut dev = Device::select(Cpu::default(), 0).unwrap();
    /// let mut buf = HostStagingBuffer::<f32, _>::new(&dev);
    /// buf.alloc(4).unwrap();
    /// dev.reset().unwrap();
    /// let _ = buf[0];
    /// ```
    pub fn reset(&mut self) -> Result<(), DeviceError> {
        self.driver
            .reset(self.id)
            .fail_with(|| device_reset(format!("{}", self.id)))?;
        debug!("device {} reset", self.id);
        Ok(())
    }
}

impl<D> fmt::Debug for Device<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Device").field("id", &self.id).finish()
    }
}

#[inline]
pub fn count_devices(driver: &impl Driver) -> Result<usize, DeviceError> {
    driver.device_count().fail_with(|| device_query(""))
}

/// 设备请求中的一个问题。
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DeviceIdIssue {
    EmptyRequest,
    NoDevices,
    Unavailable { id: u32, count: usize },
}

impl fmt::Display for DeviceIdIssue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "At least 1 GPU must be requested"),
            Self::NoDevices => write!(f, "There are no available GPUs on the system"),
            Self::Unavailable { id, count } => write!(
                f,
                "You're requesting unavailable GPU ID {id}, only {count} GPU(s) available"
            ),
        }
    }
}

/// 列出设备请求中的全部问题。
///
/// 每个不可用的 id 都单独报告，重复的 id 不合并。
pub fn audit_requested_devices(
    driver: &impl Driver,
    ids: &[u32],
) -> Result<Vec<DeviceIdIssue>, DeviceError> {
    if ids.is_empty() {
        return Ok(vec![DeviceIdIssue::EmptyRequest]);
    }
    let count = count_devices(driver)?;
    if count == 0 {
        return Ok(vec![DeviceIdIssue::NoDevices]);
    }
    Ok(ids
        .iter()
        .filter(|&&id| id as usize >= count)
        .map(|&id| DeviceIdIssue::Unavailable { id, count })
        .collect())
}

/// 检查请求的设备是否全部可用，并逐条记录问题。
///
/// 只有设备查询本身失败时才返回错误。
pub fn validate_requested_devices(driver: &impl Driver, ids: &[u32]) -> Result<bool, DeviceError> {
    let issues = audit_requested_devices(driver, ids)?;
    for issue in &issues {
        error!("{issue}");
    }
    Ok(issues.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        common_cpu::{Cpu, Op, Stats},
        DeviceArray, DeviceErrorKind, HostStagingBuffer,
    };

    #[test]
    fn test_no_devices() {
        let cpu = Cpu::new(0);
        assert_eq!(
            audit_requested_devices(&cpu, &[0]).unwrap(),
            [DeviceIdIssue::NoDevices]
        );
        assert!(!validate_requested_devices(&cpu, &[0]).unwrap());
        assert!(DeviceIdIssue::NoDevices
            .to_string()
            .contains("no available GPUs"));
    }

    #[test]
    fn test_every_unavailable_id_reported() {
        let cpu = Cpu::new(2);
        let issues = audit_requested_devices(&cpu, &[0, 5, 1, 9]).unwrap();
        assert_eq!(
            issues,
            [
                DeviceIdIssue::Unavailable { id: 5, count: 2 },
                DeviceIdIssue::Unavailable { id: 9, count: 2 },
            ]
        );
        assert!(issues[0].to_string().contains("GPU ID 5"));
        assert!(issues[1].to_string().contains("GPU ID 9"));
        assert!(!validate_requested_devices(&cpu, &[0, 5, 1, 9]).unwrap());
        assert!(validate_requested_devices(&cpu, &[0, 1]).unwrap());
    }

    #[test]
    fn test_empty_request() {
        for n in 0..3 {
            let cpu = Cpu::new(n);
            assert!(!validate_requested_devices(&cpu, &[]).unwrap());
            assert_eq!(
                audit_requested_devices(&cpu, &[]).unwrap(),
                [DeviceIdIssue::EmptyRequest]
            );
        }
    }

    #[test]
    fn test_duplicates_kept() {
        let cpu = Cpu::new(1);
        assert!(validate_requested_devices(&cpu, &[0, 0, 0]).unwrap());
        assert_eq!(audit_requested_devices(&cpu, &[3, 3]).unwrap().len(), 2);
    }

    #[test]
    fn test_query_failure() {
        let cpu = Cpu::new(1);
        cpu.fail_next(Op::DeviceCount);
        let e = validate_requested_devices(&cpu, &[0]).unwrap_err();
        assert_eq!(e.kind, DeviceErrorKind::DeviceQuery);
        assert_eq!(count_devices(&cpu).unwrap(), 1);
    }

    #[test]
    fn test_select() {
        let cpu = Cpu::new(2);
        let mut dev = Device::select(cpu.clone(), 1).unwrap();
        assert_eq!(dev.id(), 1);
        dev.synchronize().unwrap();
        dev.reset().unwrap();

        let e = Device::select(cpu, 2).unwrap_err();
        assert_eq!(e.kind, DeviceErrorKind::DeviceSelect);
        assert_eq!(e.cause.unwrap().code, 101);
    }

    #[test]
    fn test_reset_after_resources_dropped() {
        let cpu = Cpu::default();
        let mut dev = Device::select(cpu.clone(), 0).unwrap();
        {
            let mut host = HostStagingBuffer::<f32, _>::new(&dev);
            let mut array = DeviceArray::<f32, _>::new(&dev);
            host.alloc(16).unwrap();
            array.alloc(16).unwrap();
            assert_eq!(cpu.stats().device_blocks, 1);
        }
        dev.reset().unwrap();
        assert_eq!(
            cpu.stats(),
            Stats {
                device_allocations: 1,
                ..Stats::default()
            }
        );

        let mut host = HostStagingBuffer::<f32, _>::new(&dev);
        host.alloc(4).unwrap();
        host.fill(1.);
        assert_eq!(&*host, &[1.; 4]);
        assert_eq!(cpu.stats().host_blocks, 1);
    }
}
