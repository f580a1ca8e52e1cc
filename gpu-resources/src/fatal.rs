//! 批处理作业的错误策略：报告后以非零状态退出进程。
//!
//! 资源层只返回错误，是否终止由调用者通过这里决定。

use log::{error, log_enabled, Level};
use std::{fmt::Display, process::exit};

pub trait OrExit<T> {
    /// 成功时取出值，否则报告错误并以状态 1 退出。
    fn or_exit(self) -> T;
}

impl<T, E: Display> OrExit<T> for Result<T, E> {
    #[inline]
    fn or_exit(self) -> T {
        match self {
            Ok(val) => val,
            Err(e) => exit_with(e),
        }
    }
}

/// 报告错误并以状态 1 退出。
///
/// 安装了日志时写入日志，否则写入标准错误。
pub fn exit_with(e: impl Display) -> ! {
    if log_enabled!(Level::Error) {
        error!("{e}")
    } else {
        eprintln!("{e}")
    }
    exit(1)
}

#[cfg(test)]
mod test {
    use super::OrExit;
    use crate::{
        common_cpu::{Cpu, Op},
        count_devices, Device, DeviceError, LayeredSampler2DSingle,
    };
    use std::{env, process::Command};

    const CHILD: &str = "GPU_RESOURCES_FATAL_CHILD";

    #[test]
    fn test_ok_passes_through() {
        assert_eq!(count_devices(&Cpu::new(3)).or_exit(), 3);
        assert_eq!(Ok::<_, DeviceError>("value").or_exit(), "value");
    }

    #[test]
    fn test_failure_exits_with_status_1() {
        if env::var_os(CHILD).is_some() {
            let cpu = Cpu::default();
            let dev = Device::select(cpu.clone(), 0).or_exit();
            let mut sampler = LayeredSampler2DSingle::new(&dev);
            cpu.fail_next(Op::SurfaceCreate);
            sampler.alloc(8, 8, 2).or_exit();
            unreachable!()
        }

        let output = Command::new(env::current_exe().unwrap())
            .args([
                "--exact",
                "fatal::test::test_failure_exits_with_status_1",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(CHILD, "1")
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("Error creating GPU surface object"), "{stderr}");
        assert!(stderr.contains("[8x8x2]"), "{stderr}");
    }
}
