use digit_layout::{types as ty, DigitLayout};

mod private {
    pub trait Sealed {}
}

/// 可存放在显存或锁页主存中的元素类型。
///
/// 集合是封闭的：只有平台可按字节搬运的平凡布局类型实现这个特质，全零字节是每个类型的合法值。
pub trait Element: private::Sealed + Copy + Send + Sync + 'static {
    /// 全零字节对应的值。
    const ZERO: Self;
}

/// 支持异步拷贝的元素类型。
pub trait Transfer: Element {}

/// 可作为纹理和表面元素的类型。
pub trait Texel: Element {
    /// 单个通道的数字类型。
    const SCALAR: DigitLayout;
    /// 通道数，只能是 1、2 或 4。
    const CHANNELS: u32;
}

#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[repr(C, align(8))]
pub struct Float2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[repr(C)]
pub struct Float3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[repr(C, align(16))]
pub struct Float4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[repr(C, align(16))]
pub struct Double2 {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[repr(C)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 行主序 3x3 旋转矩阵。
#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[repr(C)]
pub struct Rot33 {
    pub xx: f32,
    pub xy: f32,
    pub xz: f32,
    pub yx: f32,
    pub yy: f32,
    pub yz: f32,
    pub zx: f32,
    pub zy: f32,
    pub zz: f32,
}

/// 二维投影记录：平移、旋转和权重。
#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[repr(C)]
pub struct Proj2D {
    pub t: Vec3,
    pub r: Rot33,
    pub w: f32,
}

/// 离焦参数记录。
#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[repr(C)]
pub struct Defocus {
    pub u: f32,
    pub v: f32,
    pub angle: f32,
    pub ph_shft: f32,
    pub bfactor: f32,
    pub exp_filt: f32,
    pub max_res: f32,
    pub score: f32,
}

const VEC3_ZERO: Vec3 = Vec3 {
    x: 0.,
    y: 0.,
    z: 0.,
};

const ROT33_ZERO: Rot33 = Rot33 {
    xx: 0.,
    xy: 0.,
    xz: 0.,
    yx: 0.,
    yy: 0.,
    yz: 0.,
    zx: 0.,
    zy: 0.,
    zz: 0.,
};

macro_rules! element {
    ($( $ty:ty = $zero:expr; )+) => {
        $(
            impl private::Sealed for $ty {}
            impl Element for $ty {
                const ZERO: Self = $zero;
            }
        )+
    };
}

element! {
    u32     = 0;
    f32     = 0.;
    f64     = 0.;
    Float2  = Float2 { x: 0., y: 0. };
    Float3  = Float3 { x: 0., y: 0., z: 0. };
    Float4  = Float4 { x: 0., y: 0., z: 0., w: 0. };
    Double2 = Double2 { x: 0., y: 0. };
    Vec3    = VEC3_ZERO;
    Proj2D  = Proj2D { t: VEC3_ZERO, r: ROT33_ZERO, w: 0. };
    Defocus = Defocus {
        u: 0.,
        v: 0.,
        angle: 0.,
        ph_shft: 0.,
        bfactor: 0.,
        exp_filt: 0.,
        max_res: 0.,
        score: 0.,
    };
}

macro_rules! transfer {
    ($( $ty:ty )+) => {
        $( impl Transfer for $ty {} )+
    };
}

transfer! { f32 f64 Float2 Float4 Double2 Proj2D Defocus }

macro_rules! texel {
    ($( $ty:ty: $scalar:expr, $channels:expr; )+) => {
        $(
            impl Texel for $ty {
                const SCALAR: DigitLayout = $scalar;
                const CHANNELS: u32 = $channels;
            }
        )+
    };
}

texel! {
    f32   : ty::F32, 1;
    Float2: ty::F32, 2;
    Float4: ty::F32, 4;
}

/// 元素的字节视图。
#[cfg(test)]
pub(crate) fn as_bytes<T: Element>(val: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(val.as_ptr().cast(), std::mem::size_of_val(val)) }
}
