use image::GrayImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize, Clone, Copy)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize, Clone, Copy)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Outer boundary of one connected blob of the motion mask.
#[derive(Debug, PartialEq, Eq, Deserialize, Serialize, Clone)]
pub struct MotionRegion {
    /// Closed, clockwise sequence of boundary pixels starting at the top-left-most pixel
    pub boundary: Vec<Point>,
    /// Pixels enclosed by the boundary, holes included
    pub area: u32,
    pub bounds: BoundingBox,
}

// Clockwise on screen (y grows downwards), starting west.
const DIRECTIONS: [(i64, i64); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

fn direction_index(dx: i64, dy: i64) -> usize {
    DIRECTIONS
        .iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(0)
}

/// Labels the 8-connected components of `mask` (non-zero pixels) and traces each outer boundary.
///
/// Regions come out in raster order of their top-left-most pixel.
pub fn find_regions(mask: &GrayImage) -> Vec<MotionRegion> {
    let (width, height) = mask.dimensions();
    let mut labels = vec![0u32; (width as usize) * (height as usize)];
    let mut regions = Vec::new();
    let mut next_label = 0;

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if mask.get_pixel(x, y).0[0] == 0 || labels[idx] != 0 {
                continue;
            }
            next_label += 1;
            let (pixels, bounds) = flood_label(mask, &mut labels, Point { x, y }, next_label);
            let boundary =
                trace_boundary(&labels, width, height, Point { x, y }, next_label, pixels);
            regions.push(MotionRegion {
                boundary,
                area: enclosed_area(&labels, width, &bounds, next_label),
                bounds,
            });
        }
    }
    regions
}

fn flood_label(mask: &GrayImage, labels: &mut [u32], start: Point, label: u32) -> (u32, BoundingBox) {
    let (width, height) = mask.dimensions();
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (start.x, start.y, start.x, start.y);
    let mut area = 0;
    let mut stack = vec![start];
    labels[(start.y * width + start.x) as usize] = label;

    while let Some(p) = stack.pop() {
        area += 1;
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
        for (dx, dy) in DIRECTIONS {
            let nx = p.x as i64 + dx;
            let ny = p.y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            let idx = (ny * width + nx) as usize;
            if labels[idx] == 0 && mask.get_pixel(nx, ny).0[0] != 0 {
                labels[idx] = label;
                stack.push(Point { x: nx, y: ny });
            }
        }
    }

    (
        area,
        BoundingBox {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        },
    )
}

/// Bounding box area minus the pixels reachable from outside it without crossing the component.
/// Background is 4-connected, so anything the 8-connected outline closes off counts as enclosed.
fn enclosed_area(labels: &[u32], width: u32, bounds: &BoundingBox, label: u32) -> u32 {
    // One pixel of padding all around is always outside
    let (pw, ph) = (bounds.width as usize + 2, bounds.height as usize + 2);
    let blocked = |px: usize, py: usize| {
        if px == 0 || py == 0 || px == pw - 1 || py == ph - 1 {
            return false;
        }
        let x = bounds.x as usize + px - 1;
        let y = bounds.y as usize + py - 1;
        labels[y * width as usize + x] == label
    };

    let mut seen = vec![false; pw * ph];
    let mut stack = vec![(0usize, 0usize)];
    seen[0] = true;
    let mut outside = 0u32;
    while let Some((px, py)) = stack.pop() {
        if px > 0 && py > 0 && px < pw - 1 && py < ph - 1 {
            outside += 1;
        }
        let neighbours = [
            (px.wrapping_sub(1), py),
            (px + 1, py),
            (px, py.wrapping_sub(1)),
            (px, py + 1),
        ];
        for (nx, ny) in neighbours {
            if nx >= pw || ny >= ph || seen[ny * pw + nx] || blocked(nx, ny) {
                continue;
            }
            seen[ny * pw + nx] = true;
            stack.push((nx, ny));
        }
    }
    bounds.width * bounds.height - outside
}

/// Moore-neighbour tracing. `start` must be the top-left-most pixel of the component so its
/// west neighbour is known to be outside.
fn trace_boundary(
    labels: &[u32],
    width: u32,
    height: u32,
    start: Point,
    label: u32,
    area: u32,
) -> Vec<Point> {
    let inside = |x: i64, y: i64| {
        x >= 0
            && y >= 0
            && x < width as i64
            && y < height as i64
            && labels[(y as u32 * width + x as u32) as usize] == label
    };

    let mut boundary = vec![start];
    let (mut px, mut py) = (start.x as i64, start.y as i64);
    let mut backtrack = 0;
    let mut second: Option<(i64, i64)> = None;
    let max_steps = 4 * area as usize + 16;

    for _ in 0..max_steps {
        let found = (1..=8).map(|i| (backtrack + i) % 8).find(|&d| {
            let (dx, dy) = DIRECTIONS[d];
            inside(px + dx, py + dy)
        });
        let Some(dir) = found else {
            // Single isolated pixel
            break;
        };
        let (dx, dy) = DIRECTIONS[dir];
        let (nx, ny) = (px + dx, py + dy);

        if (px, py) == (start.x as i64, start.y as i64) {
            match second {
                Some(s) if s == (nx, ny) => break,
                Some(_) => {}
                None => second = Some((nx, ny)),
            }
        }

        // The neighbour examined just before `dir` is outside; search from there next time.
        let (bx, by) = DIRECTIONS[(dir + 7) % 8];
        backtrack = direction_index(px + bx - nx, py + by - ny);
        px = nx;
        py = ny;
        if (px, py) != (start.x as i64, start.y as i64) {
            boundary.push(Point {
                x: px as u32,
                y: py as u32,
            });
        }
    }
    boundary
}
