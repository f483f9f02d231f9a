pub mod annotation;
pub mod category;
pub mod clinical;
pub mod view;

use anyhow::{anyhow, Context, Result};
use image::{ImageBuffer, Luma};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::io::annotation_record::AnnotationRecord;
use annotation::Annotation;

pub use category::{classify_position, Category, CategorySpec, Objective, Position};
pub use clinical::{ClinicalResult, Measure};
pub use view::{apply_view, view_by_name, View, ViewedCase};

/// Decoded pixel values of one image frame.
pub type PixelArray = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Supplies pixel data for image files. DICOM decoding lives outside this crate.
pub trait PixelSource: Send + Sync + fmt::Debug {
    fn pixel_array(&self, path: &Path, meta: &FrameMeta) -> Result<PixelArray>;
}

/// Reads any format the `image` crate understands and converts it to
/// single-channel float pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFileSource;

impl PixelSource for ImageFileSource {
    fn pixel_array(&self, path: &Path, _meta: &FrameMeta) -> Result<PixelArray> {
        let img = image::open(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        Ok(img.to_luma32f())
    }
}

/// Per-frame DICOM header values the comparison needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub slice_location: Option<f64>,
    pub image_position: Option<[f64; 3]>,
    pub image_orientation: Option<[f64; 6]>,
    pub instance_number: i32,
    pub trigger_time: Option<f64>,
    /// (row spacing, column spacing) in mm
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    pub rows: u32,
    pub columns: u32,
}

impl FrameMeta {
    /// Position of the frame along the slice normal. Projects the image
    /// position onto the normal of the image plane and falls back to
    /// SliceLocation when the geometry tags are missing.
    pub fn slice_position(&self) -> Option<f64> {
        if let (Some(pos), Some(ori)) = (self.image_position, self.image_orientation) {
            let row = Vector3::new(ori[0], ori[1], ori[2]);
            let col = Vector3::new(ori[3], ori[4], ori[5]);
            let normal = row.cross(&col);
            if normal.norm() > 0.0 {
                return Some(normal.normalize().dot(&Vector3::from(pos)));
            }
        }
        self.slice_location
    }
}

/// One reader's annotations of one imaging study.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_name: String,
    pub reader_name: String,
    pub studyinstanceuid: String,
    /// view tag -> (SOPInstanceUID -> image file)
    pub imgs_sop2filepath: BTreeMap<String, BTreeMap<String, PathBuf>>,
    /// SOPInstanceUID -> annotation file
    pub annos_sop2filepath: BTreeMap<String, PathBuf>,
    pub frames: BTreeMap<String, FrameMeta>,
    #[serde(skip)]
    pixel_source: Option<Arc<dyn PixelSource>>,
}

impl Case {
    pub fn new(case_name: &str, reader_name: &str, studyinstanceuid: &str) -> Self {
        Case {
            case_name: case_name.to_string(),
            reader_name: reader_name.to_string(),
            studyinstanceuid: studyinstanceuid.to_string(),
            imgs_sop2filepath: BTreeMap::new(),
            annos_sop2filepath: BTreeMap::new(),
            frames: BTreeMap::new(),
            pixel_source: None,
        }
    }

    pub fn with_pixel_source(mut self, source: Arc<dyn PixelSource>) -> Self {
        self.pixel_source = Some(source);
        self
    }

    pub fn set_pixel_source(&mut self, source: Arc<dyn PixelSource>) {
        self.pixel_source = Some(source);
    }

    pub fn add_image<P: Into<PathBuf>>(&mut self, view_tag: &str, sop: &str, path: P, meta: FrameMeta) {
        self.imgs_sop2filepath
            .entry(view_tag.to_string())
            .or_default()
            .insert(sop.to_string(), path.into());
        self.frames.insert(sop.to_string(), meta);
    }

    pub fn add_annotation<P: Into<PathBuf>>(&mut self, sop: &str, path: P) {
        self.annos_sop2filepath.insert(sop.to_string(), path.into());
    }

    /// Registers every `<SOPInstanceUID>.json` file of a directory as an
    /// annotation. Returns the number of files found.
    pub fn scan_annotation_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read annotation directory {}", dir.display()))?;
        let mut found = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(sop) = path.file_stem().and_then(|s| s.to_str()) {
                    self.annos_sop2filepath.insert(sop.to_string(), path.clone());
                    found += 1;
                }
            }
        }
        debug!(case = %self.case_name, reader = %self.reader_name, found, "scanned annotations");
        Ok(found)
    }

    /// SOPInstanceUIDs registered under a view tag, in key order.
    pub fn sops_for_view(&self, view_tag: &str) -> Vec<&str> {
        self.imgs_sop2filepath
            .get(view_tag)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn frame_meta(&self, sop: &str) -> Option<&FrameMeta> {
        self.frames.get(sop)
    }

    /// Reads the annotation of a frame. A frame without annotation file is
    /// an empty annotation, not an error.
    pub fn load_anno(&self, sop: &str) -> Result<Annotation> {
        match self.annos_sop2filepath.get(sop) {
            Some(path) => {
                let record = AnnotationRecord::read(path)?;
                Ok(Annotation::from_record(sop, &record))
            }
            None => Ok(Annotation::empty(sop)),
        }
    }

    pub fn get_spacing(&self, sop: &str) -> Option<(f64, f64)> {
        self.frames
            .get(sop)
            .and_then(|m| m.pixel_spacing)
            .map(|[r, c]| (r, c))
    }

    pub fn get_slice_thickness(&self, sop: &str) -> Option<f64> {
        self.frames.get(sop).and_then(|m| m.slice_thickness)
    }

    fn image_path(&self, sop: &str) -> Option<&PathBuf> {
        self.imgs_sop2filepath.values().find_map(|m| m.get(sop))
    }

    pub fn get_pixel_array(&self, sop: &str) -> Result<PixelArray> {
        let source = self
            .pixel_source
            .as_ref()
            .ok_or_else(|| anyhow!("no pixel source configured for case {}", self.case_name))?;
        let path = self
            .image_path(sop)
            .ok_or_else(|| anyhow!("no image registered for frame {}", sop))?;
        let meta = self.frames.get(sop).cloned().unwrap_or_default();
        source.pixel_array(path, &meta)
    }

    /// Writes the case indexes and frame metadata as one JSON file. The pixel
    /// source is not persisted.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create output directory: {:?}", parent))?;
        }
        let file = File::create(path).with_context(|| format!("failed to create case file {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("failed to write case file {:?}", path))?;
        Ok(())
    }

    /// Makes relative image and annotation paths relative to `base`.
    pub fn rebase(&mut self, base: &Path) {
        let paths = self
            .imgs_sop2filepath
            .values_mut()
            .flat_map(|m| m.values_mut())
            .chain(self.annos_sop2filepath.values_mut());
        for path in paths {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Case> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("failed to open case file {:?}", path))?;
        let case: Case = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse case file {:?}", path))?;
        debug!(case = %case.case_name, reader = %case.reader_name, frames = case.frames.len(), "case loaded");
        Ok(case)
    }
}
