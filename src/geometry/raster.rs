use std::collections::BTreeMap;

use anyhow::{bail, Result};
use geo::{Coord, CoordsIter, LineString, MultiPolygon, Polygon};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::point::Point;
use tracing::warn;

/// Binary raster, 1 for foreground and 0 for background. Pixel `(x, y)`
/// covers the unit square `[x, x+1) x [y, y+1)` of contour coordinates.
pub type Mask = GrayImage;

/// Rasterizes polygons into a `height x width` mask with origin (0,0).
///
/// A pixel is set when its center lies inside a polygon (even-odd rule, so
/// holes stay empty). Never fails: a polygon that cannot be rasterized
/// yields an all-zero mask.
pub fn to_mask(polygons: &MultiPolygon<f64>, height: u32, width: u32) -> Mask {
    match rasterize(polygons, height, width) {
        Ok(mask) => mask,
        Err(e) => {
            warn!(error = %e, "rasterization failed, returning empty mask");
            GrayImage::new(width, height)
        }
    }
}

fn rasterize(polygons: &MultiPolygon<f64>, height: u32, width: u32) -> Result<Mask> {
    let mut mask = GrayImage::new(width, height);
    if polygons.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        bail!("polygon has non-finite coordinates");
    }

    for polygon in &polygons.0 {
        let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
            .chain(polygon.interiors().iter())
            .collect();

        for row in 0..height {
            let y = row as f64 + 0.5;
            let mut crossings: Vec<f64> = Vec::new();
            for ring in &rings {
                for edge in ring.0.windows(2) {
                    let (p, q) = (edge[0], edge[1]);
                    if (p.y <= y) != (q.y <= y) {
                        crossings.push(p.x + (y - p.y) * (q.x - p.x) / (q.y - p.y));
                    }
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));

            for span in crossings.chunks_exact(2) {
                // columns whose center c + 0.5 lies in [span0, span1)
                let start = (span[0] - 0.5).ceil().max(0.0);
                let end = (span[1] - 0.5).ceil().min(width as f64);
                let mut col = start;
                while col < end {
                    mask.put_pixel(col as u32, row, Luma([1]));
                    col += 1.0;
                }
            }
        }
    }

    Ok(mask)
}

/// Neighbour offsets, each one a step of positive rotation from the previous.
/// Odd indices are the diagonals and name the pixel corner in that direction.
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Vectorizes a mask into pixel-edge polygons.
///
/// Each 8-connected foreground region becomes one polygon, the 4-connected
/// background regions it encloses become its holes. Rings run along pixel
/// edges, so the polygon area equals the foreground pixel count. A mask
/// without foreground yields the empty sentinel.
pub fn to_polygon(mask: &Mask) -> MultiPolygon<f64> {
    let contours: Vec<Contour<i32>> = find_contours(mask);

    let mut outer: BTreeMap<usize, (LineString<f64>, Vec<LineString<f64>>)> = BTreeMap::new();
    for (i, contour) in contours.iter().enumerate() {
        if contour.border_type == BorderType::Outer {
            outer.insert(i, (widen(&contour.points, false), Vec::new()));
        }
    }
    for contour in contours.iter().filter(|c| c.border_type == BorderType::Hole) {
        match contour.parent.and_then(|p| outer.get_mut(&p)) {
            Some((_, holes)) => holes.push(widen(&contour.points, true)),
            None => warn!("discarding hole border without enclosing outer border"),
        }
    }

    MultiPolygon::new(
        outer
            .into_values()
            .map(|(exterior, holes)| Polygon::new(exterior, holes))
            .collect(),
    )
}

fn direction(from: &Point<i32>, to: &Point<i32>) -> usize {
    let step = ((to.x - from.x).signum(), (to.y - from.y).signum());
    DIRECTIONS.iter().position(|d| *d == step).unwrap_or(0)
}

fn corner(pixel: &Point<i32>, dir: usize) -> Coord<f64> {
    let (dx, dy) = DIRECTIONS[dir];
    Coord {
        x: pixel.x as f64 + 0.5 + 0.5 * dx as f64,
        y: pixel.y as f64 + 0.5 + 0.5 * dy as f64,
    }
}

/// Turns a chain of border pixel centres into the ring of pixel corners
/// around it. At every pixel the corners are collected while rotating from
/// the previous pixel to the next one on the side facing away from the
/// region (the hole side for hole borders).
fn widen(chain: &[Point<i32>], hole: bool) -> LineString<f64> {
    let n = chain.len();
    if n == 1 {
        return LineString::new([1, 3, 5, 7].iter().map(|&d| corner(&chain[0], d)).collect());
    }

    // twice the signed area of the chain; zero when it only retraces itself
    let orientation: i64 = (0..n)
        .map(|i| {
            let (a, b) = (&chain[i], &chain[(i + 1) % n]);
            a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
        })
        .sum();
    let positive = orientation >= 0;
    // the outside of the chain lies on its positive side when it runs in the positive sense
    let step = if positive != hole { 1 } else { 7 };

    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(2 * n);
    for i in 0..n {
        let pixel = &chain[i];
        let back = direction(pixel, &chain[(i + n - 1) % n]);
        let ahead = direction(pixel, &chain[(i + 1) % n]);
        let mut dir = back;
        loop {
            dir = (dir + step) % 8;
            if dir % 2 == 1 {
                coords.push(corner(pixel, dir));
            }
            if dir == ahead {
                break;
            }
        }
    }
    coords.dedup();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    LineString::new(coords)
}
