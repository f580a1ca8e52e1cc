use std::{fmt, num::NonZeroU64};

macro_rules! raw_handle {
    ($( $(#[$attr:meta])* $name:ident )+) => {
        $(
            $(#[$attr])*
            #[derive(Clone, Copy, PartialEq, Eq, Hash)]
            #[repr(transparent)]
            pub struct $name(NonZeroU64);

            impl $name {
                /// 空句柄返回 [None]。
                #[inline]
                pub const fn new(raw: u64) -> Option<Self> {
                    match NonZeroU64::new(raw) {
                        Some(raw) => Some(Self(raw)),
                        None => None,
                    }
                }

                #[inline]
                pub const fn get(self) -> u64 {
                    self.0.get()
                }
            }

            impl fmt::Debug for $name {
                #[inline]
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}({:#x})", stringify!($name), self.0.get())
                }
            }
        )+
    };
}

raw_handle! {
    /// 显存地址。
    DevPtr
    /// 锁页主存地址。
    HostPtr
    /// 任务队列。
    QueueRaw
    /// 硬件数组。
    ArrayRaw
    /// 纹理视图。
    TextureRaw
    /// 表面视图。
    SurfaceRaw
}

impl HostPtr {
    #[inline]
    pub fn from_ptr<T>(ptr: *mut T) -> Option<Self> {
        Self::new(ptr as usize as _)
    }

    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.get() as usize as _
    }
}

#[test]
fn test_null_handle() {
    assert_eq!(DevPtr::new(0), None);
    assert_eq!(QueueRaw::new(16).map(QueueRaw::get), Some(16));
    assert_eq!(format!("{:?}", ArrayRaw::new(255).unwrap()), "ArrayRaw(0xff)");
    assert_eq!(HostPtr::from_ptr::<u8>(std::ptr::null_mut()), None);
}
