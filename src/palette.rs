// 该文件是 Zhaoying （照影） 项目的一部分。
// src/palette.rs - 类别颜色表
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

use image::Rgb;
use rand::{Rng, SeedableRng, rngs::StdRng};

const PALETTE_SEED: u64 = 10;
// 通道取值范围 [100, 255)，避免过暗的颜色
const CHANNEL_MIN: u8 = 100;
const CHANNEL_MAX: u8 = 255;

/// 类别 -> 颜色映射，构造后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
  colors: Box<[Rgb<u8>]>,
}

impl Palette {
  /// 为 `nc` 个类别生成颜色，相同 `nc` 总是得到相同结果
  pub fn new(nc: usize) -> Self {
    let mut rng = StdRng::seed_from_u64(PALETTE_SEED);
    let colors = (0..nc)
      .map(|_| {
        Rgb([
          rng.gen_range(CHANNEL_MIN..CHANNEL_MAX),
          rng.gen_range(CHANNEL_MIN..CHANNEL_MAX),
          rng.gen_range(CHANNEL_MIN..CHANNEL_MAX),
        ])
      })
      .collect();

    Self { colors }
  }

  pub fn color(&self, class_id: usize) -> Option<Rgb<u8>> {
    self.colors.get(class_id).copied()
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }
}
