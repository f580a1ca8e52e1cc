use crate::Texel;
use digit_layout::DigitLayout;

/// 硬件数组的三维尺寸，以元素计。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct Extent {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Extent {
    #[inline]
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    #[inline]
    pub const fn volume(&self) -> usize {
        self.width * self.height * self.depth
    }
}

/// 硬件数组的元素格式。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChannelFormat {
    pub scalar: DigitLayout,
    pub channels: u32,
}

impl ChannelFormat {
    #[inline]
    pub const fn of<T: Texel>() -> Self {
        Self {
            scalar: T::SCALAR,
            channels: T::CHANNELS,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArrayDesc {
    pub extent: Extent,
    pub format: ChannelFormat,
    /// 按 `depth` 分为独立的二维层，否则是一整块三维体。
    pub layered: bool,
    /// 允许绑定表面视图读写。
    pub surface_load_store: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum AddressMode {
    #[default]
    Wrap,
    Clamp,
    Mirror,
    /// 越界采样返回 0。
    Border,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum FilterMode {
    #[default]
    Point,
    /// 硬件插值。
    Linear,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum ReadMode {
    #[default]
    ElementType,
    NormalizedFloat,
}

/// 纹理视图的采样方式。
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct TextureDesc {
    pub address: [AddressMode; 3],
    pub filter: FilterMode,
    pub read: ReadMode,
    pub normalized_coords: bool,
}

impl TextureDesc {
    /// 前 `axes` 个轴边界寻址、线性插值、按元素类型读取、使用非归一化坐标。
    pub fn border_linear(axes: usize) -> Self {
        let mut address = [AddressMode::default(); 3];
        address[..axes].fill(AddressMode::Border);
        Self {
            address,
            filter: FilterMode::Linear,
            read: ReadMode::ElementType,
            normalized_coords: false,
        }
    }
}

#[test]
fn test_border_linear() {
    use AddressMode::{Border, Wrap};

    let desc = TextureDesc::border_linear(2);
    assert_eq!(desc.address, [Border, Border, Wrap]);
    assert_eq!(desc.filter, FilterMode::Linear);
    assert_eq!(desc.read, ReadMode::ElementType);
    assert!(!desc.normalized_coords);

    assert_eq!(TextureDesc::border_linear(3).address, [Border; 3]);
}
