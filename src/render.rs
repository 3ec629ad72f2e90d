use crossterm::{
    cursor, queue,
    style::{Color, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::cmp::Ordering;
use std::io::Write;

use crate::controls::{Control, ControlSurface};
use crate::stream::{DisplayFrame, TickStatus};

/// vertical partials (height)
const VBLOCKS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Spectrum panels span 0..SPECTRUM_CEIL like a fixed plot axis.
pub const SPECTRUM_CEIL: f32 = 0.1;

/// Rows taken by header and status above the panels.
const HEADER_ROWS: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Panel {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    /// Plot rows, excluding the title row.
    pub h: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub captured_time: Panel,
    pub captured_freq: Panel,
    pub processed_time: Panel,
    pub processed_freq: Panel,
}

/// 2x2 grid below the header: captured on top, processed below.
pub fn layout_for(w: u16, h: u16) -> Layout {
    let gap = 2u16;
    let col_w = w.saturating_sub(gap + 2) / 2;
    let body = h.saturating_sub(HEADER_ROWS + 1);
    let row_h = body / 2;
    let plot_h = row_h.saturating_sub(1);

    let left = 1u16;
    let right = left + col_w + gap;
    let top = HEADER_ROWS;
    let bottom = top + row_h;

    let panel = |x, y| Panel {
        x,
        y,
        w: col_w,
        h: plot_h,
    };
    Layout {
        captured_time: panel(left, top),
        captured_freq: panel(right, top),
        processed_time: panel(left, bottom),
        processed_freq: panel(right, bottom),
    }
}

/// Min and max of each of `cols` equal slices of `values`.
pub fn column_extents(values: &[f32], cols: usize) -> Vec<(f32, f32)> {
    if cols == 0 || values.is_empty() {
        return vec![(0.0, 0.0); cols];
    }
    (0..cols)
        .map(|c| {
            let start = c * values.len() / cols;
            let end = ((c + 1) * values.len() / cols).max(start + 1).min(values.len());
            values[start..end]
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                })
        })
        .collect()
}

#[inline]
fn level_from_frac(frac: f32) -> usize {
    ((frac.clamp(0.0, 0.9999) * 8.0) + 0.5).floor().clamp(0.0, 8.0) as usize
}

#[inline]
fn v_partial(frac: f32) -> char {
    VBLOCKS[level_from_frac(frac)]
}

fn draw_title<W: Write>(out: &mut W, p: &Panel, title: &str) -> std::io::Result<()> {
    queue!(out, cursor::MoveTo(p.x, p.y), SetForegroundColor(Color::White))?;
    let t: String = title.chars().take(p.w as usize).collect();
    out.write_all(t.as_bytes())?;
    Ok(())
}

/// Waveform in [-1, 1]: each column fills the rows its min..max spans.
pub fn draw_waveform<W: Write>(
    out: &mut W,
    p: &Panel,
    title: &str,
    samples: &[f32],
    color: Color,
) -> std::io::Result<()> {
    draw_title(out, p, title)?;
    let rows = p.h as usize;
    if rows == 0 || p.w == 0 {
        return Ok(());
    }
    let cols = column_extents(samples, p.w as usize);
    let mid = rows / 2;

    queue!(out, SetForegroundColor(color))?;
    let mut line = String::with_capacity(p.w as usize * 3);
    for row in 0..rows {
        line.clear();
        // value range covered by this row, top row is +1
        let hi = 1.0 - 2.0 * row as f32 / rows as f32;
        let lo = 1.0 - 2.0 * (row + 1) as f32 / rows as f32;
        for &(cmin, cmax) in &cols {
            let ch = if cmax >= lo && cmin <= hi {
                '█'
            } else if row == mid {
                '─'
            } else {
                ' '
            };
            line.push(ch);
        }
        queue!(out, cursor::MoveTo(p.x, p.y + 1 + row as u16))?;
        out.write_all(line.as_bytes())?;
    }
    Ok(())
}

/// Magnitude spectrum as vertical bars, 0..`ceil` mapped to the panel height.
pub fn draw_spectrum<W: Write>(
    out: &mut W,
    p: &Panel,
    title: &str,
    magnitudes: &[f32],
    ceil: f32,
    color: Color,
) -> std::io::Result<()> {
    draw_title(out, p, title)?;
    let rows = p.h as usize;
    if rows == 0 || p.w == 0 {
        return Ok(());
    }
    let bars: Vec<f32> = column_extents(magnitudes, p.w as usize)
        .into_iter()
        .map(|(_, hi)| (hi / ceil).clamp(0.0, 1.0))
        .collect();

    queue!(out, SetForegroundColor(color))?;
    let mut line = String::with_capacity(p.w as usize * 3);
    for row_top in 0..rows {
        line.clear();
        let row_from_bottom = rows - 1 - row_top;
        for &v in &bars {
            let cells = v * rows as f32;
            let full = cells.floor() as usize;
            let ch = match row_from_bottom.cmp(&full) {
                Ordering::Less => '█',
                Ordering::Equal => {
                    let frac = (cells - full as f32).max(0.0);
                    if frac > 0.0 {
                        v_partial(frac)
                    } else {
                        ' '
                    }
                }
                Ordering::Greater => ' ',
            };
            line.push(ch);
        }
        queue!(out, cursor::MoveTo(p.x, p.y + 1 + row_top as u16))?;
        out.write_all(line.as_bytes())?;
    }
    Ok(())
}

fn fmt3(v: [f64; 3]) -> String {
    format!("{:.2},{:.2},{:.2}", v[0], v[1], v[2])
}

pub fn header_line(frame: Option<&DisplayFrame>, controls: &ControlSurface) -> String {
    let p = controls.store().snapshot();
    let tick = frame.map_or(0, |f| f.tick);
    format!(
        " roomverb | RT60 {:.2}s  room {}  src {}  rcv {} | tick {}",
        p.rt60,
        fmt3(p.room_dimensions),
        fmt3(p.source_position),
        fmt3(p.receiver_position),
        tick
    )
}

pub fn controls_line(controls: &ControlSurface) -> String {
    let p = controls.store().snapshot();
    let selected = controls.selected();
    let mut s = String::from(" ");
    for ctl in Control::ALL {
        let item = format!("{} {:.2}", ctl.label(), ctl.get(&p));
        if ctl == selected {
            s.push_str(&format!("[{}] ", item));
        } else {
            s.push_str(&format!(" {}  ", item));
        }
    }
    s
}

pub fn status_line(frame: Option<&DisplayFrame>, stopped: Option<&str>) -> String {
    if let Some(reason) = stopped {
        return format!(" stopped: {}  |  q to quit", reason);
    }
    match frame.map(|f| &f.status) {
        None => " waiting for audio...  |  q quit  ↑/↓ select  ←/→ adjust  r reset".to_string(),
        Some(TickStatus::Processed) => {
            " running  |  q quit  ↑/↓ select  ←/→ adjust  r reset".to_string()
        }
        Some(TickStatus::Reused(e)) => format!(" holding last output ({})", e),
    }
}

pub fn draw_frame<W: Write>(
    out: &mut W,
    frame: Option<&DisplayFrame>,
    controls: &ControlSurface,
    stopped: Option<&str>,
    w: u16,
    h: u16,
) -> std::io::Result<()> {
    queue!(out, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    let fit = |s: String| -> String { s.chars().take(w as usize).collect() };

    queue!(out, SetForegroundColor(Color::White))?;
    out.write_all(fit(header_line(frame, controls)).as_bytes())?;
    queue!(out, cursor::MoveTo(0, 1), SetForegroundColor(Color::Grey))?;
    out.write_all(fit(controls_line(controls)).as_bytes())?;
    let status_color = match (stopped, frame.map(|f| &f.status)) {
        (Some(_), _) => Color::Red,
        (None, Some(TickStatus::Reused(_))) => Color::Yellow,
        _ => Color::Green,
    };
    queue!(out, cursor::MoveTo(0, 2), SetForegroundColor(status_color))?;
    out.write_all(fit(status_line(frame, stopped)).as_bytes())?;

    if let Some(f) = frame {
        let lay = layout_for(w, h);
        let nyquist = f.captured_freq.frequencies.last().copied().unwrap_or(0.0);
        let input = Color::Rgb { r: 110, g: 180, b: 230 };
        let reverb = Color::Rgb { r: 230, g: 150, b: 90 };
        draw_waveform(out, &lay.captured_time, "input (time)", &f.captured_time, input)?;
        draw_spectrum(
            out,
            &lay.captured_freq,
            &format!("input (0..{:.0} Hz)", nyquist),
            &f.captured_freq.magnitudes,
            SPECTRUM_CEIL,
            input,
        )?;
        draw_waveform(out, &lay.processed_time, "reverb (time)", &f.processed_time, reverb)?;
        draw_spectrum(
            out,
            &lay.processed_freq,
            &format!("reverb (0..{:.0} Hz)", nyquist),
            &f.processed_freq.magnitudes,
            SPECTRUM_CEIL,
            reverb,
        )?;
    }

    queue!(out, ResetColor)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_splits_into_quadrants() {
        let lay = layout_for(100, 40);
        assert_eq!(lay.captured_time.y, lay.captured_freq.y);
        assert_eq!(lay.processed_time.x, lay.captured_time.x);
        assert!(lay.captured_freq.x > lay.captured_time.x + lay.captured_time.w);
        assert!(lay.processed_time.y > lay.captured_time.y + lay.captured_time.h);
        assert!(lay.processed_freq.y + lay.processed_freq.h < 40);
    }

    #[test]
    fn tiny_terminal_does_not_underflow() {
        let lay = layout_for(3, 2);
        assert_eq!(lay.captured_time.h, 0);
    }

    #[test]
    fn column_extents_cover_all_samples() {
        let v: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let cols = column_extents(&v, 5);
        assert_eq!(cols, vec![(0.0, 1.0), (2.0, 3.0), (4.0, 5.0), (6.0, 7.0), (8.0, 9.0)]);
    }

    #[test]
    fn more_columns_than_samples_repeats() {
        let cols = column_extents(&[0.5, -0.5], 4);
        assert_eq!(cols.len(), 4);
        assert_eq!(cols[0], (0.5, 0.5));
        assert_eq!(cols[3], (-0.5, -0.5));
    }

    #[test]
    fn spectrum_draw_writes_into_buffer() {
        let p = Panel { x: 0, y: 0, w: 8, h: 4 };
        let mut buf: Vec<u8> = Vec::new();
        draw_spectrum(&mut buf, &p, "t", &[0.1; 16], SPECTRUM_CEIL, Color::White).unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(text.matches('█').count() >= 32);
    }

    #[test]
    fn partial_levels_are_monotonic() {
        let mut prev = 0;
        for i in 0..=10 {
            let l = level_from_frac(i as f32 / 10.0);
            assert!(l >= prev);
            prev = l;
        }
    }
}
