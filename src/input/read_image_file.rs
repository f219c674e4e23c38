// 该文件是 Jianmu （检目） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("No image found in {0}")]
  NoImage(String),
}

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn read_frame(path: &Path) -> Result<RgbFrame, ImageFileInputError> {
  let image = ImageReader::open(path)?.decode()?;
  Ok(RgbFrame::from(image.into_rgb8()))
}

fn check_scheme(url: &Url, scheme: &str) -> Result<(), ImageFileInputError> {
  if url.scheme() != scheme {
    error!(
      "URI scheme mismatch: expected '{}', found '{}'",
      scheme,
      url.scheme()
    );
    return Err(ImageFileInputError::SchemaMismatch);
  }
  Ok(())
}

/// 单张图像，`image:///path/to/file.jpg`
pub struct ImageFileInput {
  frame: Option<RgbFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let path = crate::decode_url_path(url);
    let frame = read_frame(Path::new(&path))?;
    debug!("读取图像 {}: {}x{}", path, frame.width(), frame.height());

    Ok(ImageFileInput { frame: Some(frame) })
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

/// 目录中的所有图像（按文件名排序），`folder:///path/to/dir`
pub struct ImageDirectoryInput {
  paths: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirectoryInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let directory = crate::decode_url_path(url);

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(&directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if path.is_file() && is_image {
        paths.push(path);
      }
    }
    if paths.is_empty() {
      return Err(ImageFileInputError::NoImage(directory));
    }
    paths.sort();
    debug!("目录 {} 中共有 {} 张图像", directory, paths.len());

    Ok(ImageDirectoryInput {
      paths: paths.into(),
    })
  }
}

impl Iterator for ImageDirectoryInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    // 无法解码的文件跳过
    while let Some(path) = self.paths.pop_front() {
      match read_frame(&path) {
        Ok(frame) => return Some(frame),
        Err(e) => warn!("跳过图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
