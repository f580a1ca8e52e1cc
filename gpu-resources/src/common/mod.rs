mod desc;
mod element;
mod error;
mod raw;

pub use desc::{
    AddressMode, ArrayDesc, ChannelFormat, Extent, FilterMode, ReadMode, TextureDesc,
};
pub use element::{
    Defocus, Double2, Element, Float2, Float3, Float4, Proj2D, Rot33, Texel, Transfer, Vec3,
};
pub use error::{functions::*, DeviceError, DeviceErrorKind, DriverError};
pub use raw::{ArrayRaw, DevPtr, HostPtr, QueueRaw, SurfaceRaw, TextureRaw};

#[cfg(test)]
pub(crate) use element::as_bytes;
pub(crate) use error::Fallible;
