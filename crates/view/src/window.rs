#![forbid(unsafe_code)]

use serde::Serialize;

/// Rows to render: `start..=end`, drawn `offset_px` from the top of the
/// full-height scroll content.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    pub offset_px: f64,
}

impl Window {
    pub fn len(&self) -> usize { self.end - self.start + 1 }
    pub fn contains(&self, row: usize) -> bool { (self.start..=self.end).contains(&row) }
}

/// Visible window for a fixed-row-height list with `buffer` extra rows on
/// each side. `None` for an empty list or a non-positive row height.
pub fn compute_window(scroll_top: f64, total: usize, item_height: f64, container_height: f64, buffer: usize) -> Option<Window> {
    if total == 0 || item_height <= 0.0 { return None; }
    let first = (scroll_top.max(0.0) / item_height).floor() as usize;
    let start = first.saturating_sub(buffer).min(total - 1);
    let rows = (container_height.max(0.0) / item_height).ceil() as usize;
    let end = (start + rows + 2 * buffer).min(total - 1);
    Some(Window { start, end, offset_px: start as f64 * item_height })
}

/// Window math plus the one piece of state it needs: the last scroll offset.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedList {
    item_height: f64,
    container_height: f64,
    buffer: usize,
    scroll_top: f64,
}

impl WindowedList {
    pub fn new(item_height: f64, container_height: f64, buffer: usize) -> Self {
        Self { item_height, container_height, buffer, scroll_top: 0.0 }
    }

    pub fn scroll_top(&self) -> f64 { self.scroll_top }
    pub fn on_scroll(&mut self, scroll_top: f64) { self.scroll_top = scroll_top.max(0.0); }
    pub fn resize(&mut self, container_height: f64) { self.container_height = container_height; }

    pub fn total_height(&self, total: usize) -> f64 { total as f64 * self.item_height }

    pub fn window(&self, total: usize) -> Option<Window> {
        compute_window(self.scroll_top, total, self.item_height, self.container_height, self.buffer)
    }

    /// The rows of `rows` that fall in the current window.
    pub fn slice<'a, T>(&self, rows: &'a [T]) -> &'a [T] {
        match self.window(rows.len()) {
            Some(w) => &rows[w.start..=w.end],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_at_top_and_in_the_middle() {
        let w = compute_window(0.0, 1000, 80.0, 600.0, 5).expect("window");
        assert_eq!((w.start, w.end, w.offset_px), (0, 18, 0.0));
        let w = compute_window(8000.0, 1000, 80.0, 600.0, 5).expect("window");
        assert_eq!((w.start, w.end, w.offset_px), (95, 113, 7600.0));
    }

    #[test]
    fn window_clamps_to_list_end() {
        let w = compute_window(1_000_000.0, 30, 80.0, 600.0, 5).expect("window");
        assert_eq!(w.end, 29);
        assert!(w.start <= w.end);
        assert_eq!(compute_window(0.0, 0, 80.0, 600.0, 5), None);
        assert_eq!(compute_window(0.0, 10, 0.0, 600.0, 5), None);
    }

    #[test]
    fn visual_centre_row_is_always_rendered() {
        for &(total, h, c) in &[(500usize, 80.0f64, 600.0f64), (37, 33.0, 410.0), (1000, 48.0, 900.0), (12, 120.0, 500.0)] {
            let max_top = (total as f64 * h - c).max(0.0);
            let mut top = 0.0;
            while top <= max_top {
                let w = compute_window(top, total, h, c, 5).expect("window");
                let centre = (((top + c / 2.0) / h).floor() as usize).min(total - 1);
                assert!(w.contains(centre), "total={} h={} c={} top={} window={:?}", total, h, c, top, w);
                top += 7.0;
            }
        }
    }

    #[test]
    fn list_slices_the_window() {
        let rows: Vec<u32> = (0..100).collect();
        let mut l = WindowedList::new(50.0, 200.0, 2);
        assert_eq!(l.slice(&rows), &rows[0..=8]);
        l.on_scroll(1000.0);
        let w = l.window(rows.len()).expect("window");
        assert_eq!((w.start, w.end), (18, 26));
        assert_eq!(l.slice(&rows).first(), Some(&18));
        assert_eq!(l.total_height(rows.len()), 5000.0);
        l.on_scroll(-10.0);
        assert_eq!(l.scroll_top(), 0.0);
        let empty: [u32; 0] = [];
        assert!(l.slice(&empty).is_empty());
    }
}
