use std::{error::Error, fmt};

/// 平台驱动报告的原始错误。
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    #[inline]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DriverError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl Error for DriverError {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeviceErrorKind {
    DeviceQuery,
    DeviceSelect,
    DeviceSync,
    DeviceReset,
    StreamCreate,
    StreamSync,
    DeviceAlloc,
    HostAlloc,
    MemoryClear,
    ArrayCreate,
    TextureCreate,
    SurfaceCreate,
    Transfer,
    Release,
    OutOfRange,
    DeviceMismatch,
}

impl DeviceErrorKind {
    /// 失败操作的描述。
    pub const fn operation(self) -> &'static str {
        match self {
            Self::DeviceQuery => "Error counting GPU devices",
            Self::DeviceSelect => "Error accessing GPU device",
            Self::DeviceSync => "Error synchronizing GPU device",
            Self::DeviceReset => "Error resetting GPU device",
            Self::StreamCreate => "Error creating GPU stream",
            Self::StreamSync => "Error synchronizing GPU stream",
            Self::DeviceAlloc => "Error allocating GPU memory",
            Self::HostAlloc => "Error allocating GPU-host memory",
            Self::MemoryClear => "Error clearing GPU memory",
            Self::ArrayCreate => "Error allocating GPU 3D array",
            Self::TextureCreate => "Error creating GPU texture object",
            Self::SurfaceCreate => "Error creating GPU surface object",
            Self::Transfer => "Error copying GPU memory",
            Self::Release => "Error releasing GPU resource",
            Self::OutOfRange => "Transfer out of range",
            Self::DeviceMismatch => "Resources belong to different devices",
        }
    }
}

/// 资源层错误：失败的操作、上下文信息和平台错误。
#[derive(Clone, Debug)]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub info: String,
    pub cause: Option<DriverError>,
}

impl DeviceError {
    #[inline]
    pub fn caused_by(mut self, cause: DriverError) -> Self {
        self.cause = Some(cause);
        self
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind.operation())?;
        if !self.info.is_empty() {
            write!(f, " {}", self.info)?;
        }
        match &self.cause {
            Some(cause) => write!(f, ". GPU error: {cause}."),
            None => write!(f, "."),
        }
    }
}

impl Error for DeviceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|e| e as _)
    }
}

/// 将驱动错误包装为资源层错误。
pub(crate) trait Fallible<T> {
    fn fail_with(self, err: impl FnOnce() -> DeviceError) -> Result<T, DeviceError>;
}

impl<T> Fallible<T> for Result<T, DriverError> {
    #[inline]
    fn fail_with(self, err: impl FnOnce() -> DeviceError) -> Result<T, DeviceError> {
        self.map_err(|cause| err().caused_by(cause))
    }
}

pub(super) mod functions {
    use super::{DeviceError, DeviceErrorKind::*};

    macro_rules! builder {
        ($ty:ident: $name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> $ty {
                $ty {
                    kind: $kind,
                    info: info.into(),
                    cause: None,
                }
            }
        };
    }

    builder!(DeviceError: device_query    DeviceQuery   );
    builder!(DeviceError: device_select   DeviceSelect  );
    builder!(DeviceError: device_sync     DeviceSync    );
    builder!(DeviceError: device_reset    DeviceReset   );
    builder!(DeviceError: stream_create   StreamCreate  );
    builder!(DeviceError: stream_sync     StreamSync    );
    builder!(DeviceError: device_alloc    DeviceAlloc   );
    builder!(DeviceError: host_alloc      HostAlloc     );
    builder!(DeviceError: memory_clear    MemoryClear   );
    builder!(DeviceError: array_create    ArrayCreate   );
    builder!(DeviceError: texture_create  TextureCreate );
    builder!(DeviceError: surface_create  SurfaceCreate );
    builder!(DeviceError: transfer_failed Transfer      );
    builder!(DeviceError: release_failed  Release       );
    builder!(DeviceError: out_of_range    OutOfRange    );
    builder!(DeviceError: device_mismatch DeviceMismatch);
}
