// 该文件是 Zhaoying （照影） 项目的一部分。
// src/frame.rs - 帧预处理：补边与 NCHW 转换
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{
  RgbImage,
  imageops::{self, FilterType},
};

const RGB_CHANNELS: usize = 3;

/// 把图像放在边长 `max(w, h)` 的全零方形画布左上角
pub fn letterbox(image: &RgbImage) -> RgbImage {
  let side = image.width().max(image.height());
  if image.width() == side && image.height() == side {
    return image.clone();
  }

  let mut canvas = RgbImage::new(side, side);
  imageops::replace(&mut canvas, image, 0, 0);
  canvas
}

/// 补边后缩放到网络输入边长
pub fn letterbox_resized(image: &RgbImage, square_size: u32) -> RgbImage {
  let square = letterbox(image);
  if square.width() == square_size {
    return square;
  }
  imageops::resize(&square, square_size, square_size, FilterType::Triangle)
}

/// HWC u8 -> CHW f32，按 1/255 归一化
pub fn to_nchw_blob(image: &RgbImage) -> Vec<f32> {
  let width = image.width() as usize;
  let height = image.height() as usize;
  let plane_size = width * height;
  let mut blob = vec![0f32; plane_size * RGB_CHANNELS];

  for (x, y, pixel) in image.enumerate_pixels() {
    let idx = y as usize * width + x as usize;
    for c in 0..RGB_CHANNELS {
      blob[c * plane_size + idx] = pixel[c] as f32 / 255.0;
    }
  }

  blob
}
