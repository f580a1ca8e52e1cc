//! 由硬件数组和绑定在其上的纹理、表面视图组成的采样资源。

use crate::{
    array_create, common::Fallible, release_failed, surface_create, texture_create, ArrayDesc,
    ArrayRaw, ChannelFormat, Device, DeviceError, Driver, Extent, Float2, SurfaceRaw, Texel,
    TextureDesc, TextureRaw,
};
use log::{debug, warn};
use std::marker::PhantomData;

/// 采样资源的形状。
pub trait Kind {
    /// 按层组织的二维数组，否则是三维体。
    const LAYERED: bool;
    /// 边界寻址的轴数。
    const AXES: usize;
}

/// `z` 个独立的 `x × y` 层。
pub enum Layered {}
/// 一整块 `x × y × z` 体。
pub enum Volume {}

impl Kind for Layered {
    const LAYERED: bool = true;
    const AXES: usize = 2;
}

impl Kind for Volume {
    const LAYERED: bool = false;
    const AXES: usize = 3;
}

/// 硬件数组，加上一个只读插值的纹理视图和一个可读写的表面视图。
///
/// 纹理视图边界寻址、线性插值、按元素类型读取、使用非归一化坐标。
/// 三者一同创建，以创建的逆序释放。
pub struct Sampler<'ctx, T: Texel, D: Driver, K: Kind> {
    dev: &'ctx Device<D>,
    array: Option<ArrayRaw>,
    texture: Option<TextureRaw>,
    surface: Option<SurfaceRaw>,
    extent: Extent,
    _phantom: PhantomData<(T, K)>,
}

pub type LayeredSampler2D<'ctx, T, D> = Sampler<'ctx, T, D, Layered>;
pub type VolumeSampler3D<'ctx, T, D> = Sampler<'ctx, T, D, Volume>;

pub type LayeredSampler2DSingle<'ctx, D> = LayeredSampler2D<'ctx, f32, D>;
pub type LayeredSampler2DSingle2<'ctx, D> = LayeredSampler2D<'ctx, Float2, D>;
pub type VolumeSampler3DSingle2<'ctx, D> = VolumeSampler3D<'ctx, Float2, D>;

impl<'ctx, T: Texel, D: Driver, K: Kind> Sampler<'ctx, T, D, K> {
    #[inline]
    pub const fn new(dev: &'ctx Device<D>) -> Self {
        Self {
            dev,
            array: None,
            texture: None,
            surface: None,
            extent: Extent::new(0, 0, 0),
            _phantom: PhantomData,
        }
    }

    /// 分配 `x × y × z` 的数组并创建两个视图，先前持有的资源先被释放。
    ///
    /// 任一步失败时，已创建的部分被释放。
    pub fn alloc(&mut self, x: usize, y: usize, z: usize) -> Result<(), DeviceError> {
        self.release()?;
        let extent = Extent::new(x, y, z);
        match self.build(extent) {
            Ok(()) => {
                self.extent = extent;
                Ok(())
            }
            Err(e) => {
                if let Err(e) = self.release() {
                    warn!("{e}")
                }
                Err(e)
            }
        }
    }

    fn build(&mut self, extent: Extent) -> Result<(), DeviceError> {
        let driver = self.dev.driver();
        let id = self.dev.id();
        let info = || format!("[{}x{}x{}]", extent.width, extent.height, extent.depth);

        let desc = ArrayDesc {
            extent,
            format: ChannelFormat::of::<T>(),
            layered: K::LAYERED,
            surface_load_store: true,
        };
        let array = driver
            .array_create(id, &desc)
            .fail_with(|| array_create(info()))?;
        self.array = Some(array);

        let texture = driver
            .texture_create(id, array, &TextureDesc::border_linear(K::AXES))
            .fail_with(|| texture_create(info()))?;
        self.texture = Some(texture);

        let surface = driver
            .surface_create(id, array)
            .fail_with(|| surface_create(info()))?;
        self.surface = Some(surface);

        debug!("{array:?} {texture:?} {surface:?} created {}", info());
        Ok(())
    }

    #[inline]
    pub const fn device(&self) -> &'ctx Device<D> {
        self.dev
    }

    #[inline]
    pub const fn texture(&self) -> Option<TextureRaw> {
        self.texture
    }

    #[inline]
    pub const fn surface(&self) -> Option<SurfaceRaw> {
        self.surface
    }

    #[inline]
    pub const fn array(&self) -> Option<ArrayRaw> {
        self.array
    }

    #[inline]
    pub const fn extent(&self) -> Extent {
        self.extent
    }

    /// 先释放视图再释放数组。
    ///
    /// 出错时继续释放余下的部分，返回第一个错误。
    fn release(&mut self) -> Result<(), DeviceError> {
        let driver = self.dev.driver();
        let id = self.dev.id();
        let mut result = Ok(());
        let mut record = |r: Result<(), DeviceError>| {
            if result.is_ok() {
                result = r
            }
        };

        if let Some(surface) = self.surface.take() {
            record(
                driver
                    .surface_destroy(id, surface)
                    .fail_with(|| release_failed(format!("{surface:?}"))),
            );
        }
        if let Some(texture) = self.texture.take() {
            record(
                driver
                    .texture_destroy(id, texture)
                    .fail_with(|| release_failed(format!("{texture:?}"))),
            );
        }
        if let Some(array) = self.array.take() {
            record(
                driver
                    .array_destroy(id, array)
                    .fail_with(|| release_failed(format!("{array:?}"))),
            );
            debug!("{array:?} released");
        }
        self.extent = Extent::new(0, 0, 0);
        result
    }
}

impl<T: Texel, D: Driver, K: Kind> Drop for Sampler<'_, T, D, K> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{e}")
        }
    }
}
