//! Geometric and intensity comparators between two readers' shapes.
//!
//! Every metric is a stateless value with a name and a unit. `compute` may
//! fail (missing spacing, wrong geometry type, ...); `get_val` turns any
//! failure into NaN so a comparison table is always fully shaped.

use anyhow::{anyhow, bail, Result};
use geo::{Area, Geometry, MultiPolygon};
use nalgebra::Vector2;
use tracing::warn;

use std::fmt;

use crate::case::PixelArray;
use crate::geometry::{self, raster::to_mask};

/// Scale information and pixel data a metric may need.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricContext<'a> {
    /// (row spacing, column spacing) in mm
    pub pixel_spacing: Option<(f64, f64)>,
    pub slice_thickness: Option<f64>,
    pub pixels1: Option<&'a PixelArray>,
    pub pixels2: Option<&'a PixelArray>,
}

impl MetricContext<'_> {
    fn spacing(&self) -> Result<(f64, f64)> {
        self.pixel_spacing
            .ok_or_else(|| anyhow!("pixel spacing not available"))
    }

    fn thickness(&self) -> Result<f64> {
        self.slice_thickness
            .ok_or_else(|| anyhow!("slice thickness not available"))
    }
}

pub trait Metric: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn unit(&self) -> &'static str;
    fn compute(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, ctx: &MetricContext) -> Result<f64>;

    fn get_val(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, ctx: &MetricContext) -> f64 {
        match self.compute(geo1, geo2, ctx) {
            Ok(v) => v,
            Err(e) => {
                warn!(metric = self.name(), error = %e, "metric computation failed");
                f64::NAN
            }
        }
    }

    fn get_val_string(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, ctx: &MetricContext) -> String {
        format_value(self.get_val(geo1, geo2, ctx))
    }
}

/// Two decimals, `nan` for missing values.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{:.2}", value)
    }
}

fn polygons(geom: &Geometry<f64>) -> Result<MultiPolygon<f64>> {
    let shape = geometry::polygonal(geom).ok_or_else(|| anyhow!("expected a polygonal geometry"))?;
    if geometry::has_overlapping_parts(&shape) {
        bail!("multipolygon parts overlap");
    }
    Ok(shape)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiceMetric;

impl Metric for DiceMetric {
    fn name(&self) -> &'static str {
        "Dice"
    }
    fn unit(&self) -> &'static str {
        "%"
    }
    fn compute(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, _ctx: &MetricContext) -> Result<f64> {
        Ok(geometry::dice(&polygons(geo1)?, &polygons(geo2)?))
    }
}

/// Hausdorff distance in mm. NaN (without failing) when only one reader drew.
#[derive(Debug, Clone, Copy, Default)]
pub struct HausdorffMetric;

impl Metric for HausdorffMetric {
    fn name(&self) -> &'static str {
        "HD"
    }
    fn unit(&self) -> &'static str {
        "mm"
    }
    fn compute(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, ctx: &MetricContext) -> Result<f64> {
        let dist = geometry::hausdorff(&polygons(geo1)?, &polygons(geo2)?);
        if dist.is_nan() || dist == 0.0 {
            return Ok(dist);
        }
        let (row, _) = ctx.spacing()?;
        Ok(dist * row)
    }
}

fn area_delta_mm2(geo1: &Geometry<f64>, geo2: &Geometry<f64>, ctx: &MetricContext) -> Result<f64> {
    let (row, col) = ctx.spacing()?;
    let delta = polygons(geo1)?.unsigned_area() - polygons(geo2)?.unsigned_area();
    Ok(delta * row * col)
}

/// Signed volume difference of one slice, geo1 - geo2, in ml.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlDiffMetric;

impl Metric for MlDiffMetric {
    fn name(&self) -> &'static str {
        "ml diff"
    }
    fn unit(&self) -> &'static str {
        "ml"
    }
    fn compute(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, ctx: &MetricContext) -> Result<f64> {
        Ok(area_delta_mm2(geo1, geo2, ctx)? * ctx.thickness()? / 1000.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AbsMlDiffMetric;

impl Metric for AbsMlDiffMetric {
    fn name(&self) -> &'static str {
        "abs ml diff"
    }
    fn unit(&self) -> &'static str {
        "ml"
    }
    fn compute(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, ctx: &MetricContext) -> Result<f64> {
        Ok(MlDiffMetric.compute(geo1, geo2, ctx)?.abs())
    }
}

/// Signed area difference, geo1 - geo2, in cm².
#[derive(Debug, Clone, Copy, Default)]
pub struct AreaDiffMetric;

impl Metric for AreaDiffMetric {
    fn name(&self) -> &'static str {
        "area diff"
    }
    fn unit(&self) -> &'static str {
        "cm²"
    }
    fn compute(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, ctx: &MetricContext) -> Result<f64> {
        Ok(area_delta_mm2(geo1, geo2, ctx)? / 100.0)
    }
}

/// Mean pixel value inside each reader's contour, reader 1 minus reader 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvgIntensityDiffMetric;

/// Mean pixel value inside the polygons, NaN for an empty mask.
pub fn mean_intensity(polys: &MultiPolygon<f64>, pixels: &PixelArray) -> f64 {
    let mask = to_mask(polys, pixels.height(), pixels.width());
    let (sum, count) = mask
        .pixels()
        .zip(pixels.pixels())
        .filter(|(m, _)| m[0] > 0)
        .fold((0.0, 0usize), |(s, n), (_, p)| (s + p[0] as f64, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

impl Metric for AvgIntensityDiffMetric {
    fn name(&self) -> &'static str {
        "avg intensity diff"
    }
    fn unit(&self) -> &'static str {
        "[]"
    }
    fn compute(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, ctx: &MetricContext) -> Result<f64> {
        let px1 = ctx.pixels1.ok_or_else(|| anyhow!("pixel data of first frame not available"))?;
        let px2 = ctx.pixels2.ok_or_else(|| anyhow!("pixel data of second frame not available"))?;
        Ok(mean_intensity(&polygons(geo1)?, px1) - mean_intensity(&polygons(geo2)?, px2))
    }
}

/// Signed angle in degrees from the direction of geo2 to the direction of
/// geo1. Both geometries are lines or point pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AngleDiffMetric;

fn direction(geom: &Geometry<f64>) -> Result<Vector2<f64>> {
    let (a, b) = geometry::endpoints(geom).ok_or_else(|| anyhow!("geometry has no direction"))?;
    Ok(Vector2::new(b.x() - a.x(), b.y() - a.y()))
}

impl Metric for AngleDiffMetric {
    fn name(&self) -> &'static str {
        "angle diff"
    }
    fn unit(&self) -> &'static str {
        "°"
    }
    fn compute(&self, geo1: &Geometry<f64>, geo2: &Geometry<f64>, _ctx: &MetricContext) -> Result<f64> {
        let (d1, d2) = (direction(geo1)?, direction(geo2)?);
        let cross = d2.x * d1.y - d2.y * d1.x;
        Ok(cross.atan2(d2.dot(&d1)).to_degrees())
    }
}
