/// Software raster (0x00RRGGBB pixels), the buffer format minifb presents
#[derive(Debug, Clone)]
pub struct Canvas {
    width: usize,
    height: usize,
    buffer: Vec<u32>,
}

impl Canvas {
    /// Black canvas of `width` x `height`
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            buffer: vec![0u32; width * height],
        }
    }

    /// Width in pixels
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major pixels, ready for minifb
    pub fn buffer(&self) -> &[u32] {
        &self.buffer
    }

    /// Fill with a solid colour
    pub fn clear(&mut self, color: u32) {
        self.buffer.fill(color);
    }

    /// Pixel at (x, y), `None` outside the canvas
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        self.index(x, y).map(|i| self.buffer[i])
    }

    /// RGB frame → buffer, mirrored horizontally when requested.
    /// Sizes that differ are cropped, not scaled.
    pub fn draw_rgb(&mut self, width: usize, height: usize, rgb: &[u8], mirror: bool) {
        for y in 0..self.height.min(height) {
            for x in 0..self.width.min(width) {
                let sx = if mirror { width - 1 - x } else { x };
                let i = (y * width + sx) * 3;
                let Some(px) = rgb.get(i..i + 3) else {
                    continue;
                };
                let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                self.buffer[y * self.width + x] = (r << 16) | (g << 8) | b;
            }
        }
    }

    /// Pixel write with bounds check
    pub fn set_pixel(&mut self, x: i32, y: i32, color: u32) {
        if let Some(i) = self.index(x, y) {
            self.buffer[i] = color;
        }
    }

    /// Alpha-blended pixel write
    pub fn blend_pixel(&mut self, x: i32, y: i32, color: u32, alpha: f32) {
        let Some(i) = self.index(x, y) else {
            return;
        };
        let a = alpha.clamp(0.0, 1.0);
        let dst = self.buffer[i];
        let mix = |shift: u32| {
            let s = ((color >> shift) & 0xFF) as f32;
            let d = ((dst >> shift) & 0xFF) as f32;
            ((s * a + d * (1.0 - a)).round() as u32) << shift
        };
        self.buffer[i] = mix(16) | mix(8) | mix(0);
    }

    /// Bresenham line
    pub fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u32) {
        self.walk_line(x0, y0, x1, y1, |c, x, y| c.set_pixel(x, y, color));
    }

    /// Line stamped with a disc of `radius`, alpha-blended
    pub fn draw_thick_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, radius: i32, color: u32, alpha: f32) {
        self.walk_line(x0, y0, x1, y1, |c, x, y| {
            c.stamp_disc(x, y, radius, |c, px, py| c.blend_pixel(px, py, color, alpha))
        });
    }

    /// Filled circle
    pub fn draw_circle(&mut self, cx: i32, cy: i32, radius: i32, color: u32) {
        self.stamp_disc(cx, cy, radius, |c, x, y| c.set_pixel(x, y, color));
    }

    /// Alpha-blended filled circle
    pub fn fill_circle_alpha(&mut self, cx: i32, cy: i32, radius: i32, color: u32, alpha: f32) {
        self.stamp_disc(cx, cy, radius, |c, x, y| c.blend_pixel(x, y, color, alpha));
    }

    fn walk_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, mut plot: impl FnMut(&mut Self, i32, i32)) {
        let Some((x0, y0, x1, y1)) = self.clip_segment(x0, y0, x1, y1) else {
            return;
        };
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            plot(self, x, y);

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Only the on-canvas part of the disc is visited
    fn stamp_disc(&mut self, cx: i32, cy: i32, radius: i32, mut plot: impl FnMut(&mut Self, i32, i32)) {
        let r = i64::from(radius.clamp(0, self.margin()));
        let (cx, cy) = (i64::from(cx), i64::from(cy));
        let (x_lo, x_hi) = ((cx - r).max(0), (cx + r).min(self.width as i64 - 1));
        let (y_lo, y_hi) = ((cy - r).max(0), (cy + r).min(self.height as i64 - 1));
        for y in y_lo..=y_hi {
            for x in x_lo..=x_hi {
                let (dx, dy) = (x - cx, y - cy);
                if dx * dx + dy * dy <= r * r {
                    plot(self, x as i32, y as i32);
                }
            }
        }
    }

    /// Largest disc radius, also the slack kept around the canvas when clipping lines
    fn margin(&self) -> i32 {
        self.width.max(self.height).min(i32::MAX as usize / 4) as i32
    }

    /// Liang-Barsky clip against the canvas grown by `margin` on every side
    fn clip_segment(&self, x0: i32, y0: i32, x1: i32, y1: i32) -> Option<(i32, i32, i32, i32)> {
        let pad = f64::from(self.margin());
        let (x_min, y_min) = (-pad, -pad);
        let x_max = self.width as f64 - 1.0 + pad;
        let y_max = self.height as f64 - 1.0 + pad;

        let (fx, fy) = (f64::from(x0), f64::from(y0));
        let (dx, dy) = (f64::from(x1) - fx, f64::from(y1) - fy);
        let mut t0 = 0.0f64;
        let mut t1 = 1.0f64;
        for (p, q) in [(-dx, fx - x_min), (dx, x_max - fx), (-dy, fy - y_min), (dy, y_max - fy)] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }

        let at = |t: f64| ((fx + t * dx).round() as i32, (fy + t * dy).round() as i32);
        let (a, b) = (at(t0), at(t1));
        Some((a.0, a.1, b.0, b.1))
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            Some(y as usize * self.width + x as usize)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_pixel_out_of_bounds_ignored() {
        let mut c = Canvas::new(4, 4);
        c.set_pixel(-1, 0, 0xFFFFFF);
        c.set_pixel(4, 4, 0xFFFFFF);
        assert!(c.buffer().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_line_endpoints() {
        let mut c = Canvas::new(10, 10);
        c.draw_line(1, 1, 8, 5, 0x00FF00);
        assert_eq!(c.pixel(1, 1), Some(0x00FF00));
        assert_eq!(c.pixel(8, 5), Some(0x00FF00));
    }

    #[test]
    fn test_circle_radius() {
        let mut c = Canvas::new(10, 10);
        c.draw_circle(5, 5, 2, 0xFF0000);
        assert_eq!(c.pixel(5, 3), Some(0xFF0000));
        assert_eq!(c.pixel(3, 3), Some(0));
    }

    #[test]
    fn test_blend_half() {
        let mut c = Canvas::new(1, 1);
        c.blend_pixel(0, 0, 0xFFFFFF, 0.5);
        assert_eq!(c.pixel(0, 0), Some(0x808080));
    }

    #[test]
    fn test_far_out_of_range_line_is_clipped() {
        let mut c = Canvas::new(10, 10);
        c.draw_line(i32::MIN, 5, i32::MAX, 5, 0x00FF00);
        assert_eq!(c.pixel(0, 5), Some(0x00FF00));
        assert_eq!(c.pixel(9, 5), Some(0x00FF00));

        let mut c = Canvas::new(10, 10);
        c.draw_thick_line(i32::MIN, i32::MIN, i32::MIN + 1, i32::MAX, 2, 0xFFFFFF, 1.0);
        assert!(c.buffer().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_huge_radius_is_bounded() {
        let mut c = Canvas::new(8, 8);
        c.draw_circle(i32::MAX, i32::MAX, i32::MAX, 0xFF0000);
        assert!(c.buffer().iter().all(|&p| p == 0));
        c.draw_circle(4, 4, i32::MAX, 0xFF0000);
        assert!(c.buffer().iter().all(|&p| p == 0xFF0000));
    }

    #[test]
    fn test_draw_rgb_mirror() {
        let mut c = Canvas::new(2, 1);
        c.draw_rgb(2, 1, &[255, 0, 0, 0, 0, 255], true);
        assert_eq!(c.pixel(0, 0), Some(0x0000FF));
        assert_eq!(c.pixel(1, 0), Some(0xFF0000));
    }
}
