// src/monitor.rs
//
// Terminal view of the LED colour stream. Each strip snapshot redraws a single line of
// coloured cells in place; bus frames and diagnostic lines from the controller scroll
// above it.

use crossterm::{
    cursor, queue,
    style::{Color, Print, ResetColor, SetBackgroundColor},
    terminal,
};
use std::io::Write;

use crate::io::line::{ColorFrame, InboundLine, Rgb};

/// Width of one LED cell in terminal columns
const CELL: &str = "  ";

pub struct StripMonitor<W: Write> {
    out: W,
    frames: u64,
    diagnostics: u64,
    bus_frames: u64,
    /// Last strip shown, redrawn under each diagnostic line
    last: Option<ColorFrame>,
}

impl<W: Write> StripMonitor<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            frames: 0,
            diagnostics: 0,
            bus_frames: 0,
            last: None,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn diagnostics(&self) -> u64 {
        self.diagnostics
    }

    /// CAN frames echoed back by the controller or an adapter
    pub fn bus_frames(&self) -> u64 {
        self.bus_frames
    }

    pub fn handle(&mut self, line: &InboundLine) -> std::io::Result<()> {
        match line {
            InboundLine::Colors(frame) => {
                self.frames += 1;
                self.draw_strip(frame)?;
                self.last = Some(frame.clone());
            }
            InboundLine::Diagnostic(text) => {
                self.diagnostics += 1;
                self.print_above(&format!("> {}", text))?;
            }
            InboundLine::Frame(frame) => {
                self.bus_frames += 1;
                self.print_above(&format!(
                    "< 0x{:03X} [{}] {}",
                    frame.frame_id,
                    frame.dlc(),
                    hex::encode_upper(&frame.data)
                ))?;
            }
        }
        self.out.flush()
    }

    /// Scroll a text line above the strip, then redraw the last strip under it.
    fn print_above(&mut self, text: &str) -> std::io::Result<()> {
        queue!(
            self.out,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine),
            Print(format!("{}\r\n", text))
        )?;
        if let Some(frame) = self.last.take() {
            self.draw_strip(&frame)?;
            self.last = Some(frame);
        }
        Ok(())
    }

    fn draw_strip(&mut self, frame: &ColorFrame) -> std::io::Result<()> {
        queue!(
            self.out,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine)
        )?;
        for rgb in &frame.colors {
            queue!(self.out, SetBackgroundColor(to_color(*rgb)), Print(CELL))?;
        }
        queue!(self.out, ResetColor, Print(format!(" {}", strip_summary(frame))))
    }

    /// Leave the cursor on a fresh line.
    pub fn finish(&mut self) -> std::io::Result<()> {
        queue!(self.out, ResetColor, Print("\r\n"))?;
        self.out.flush()?;
        tlog!(
            "[monitor] {} strip updates, {} bus frames, {} diagnostic lines",
            self.frames,
            self.bus_frames,
            self.diagnostics
        );
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn to_color(rgb: Rgb) -> Color {
    Color::Rgb {
        r: rgb.r,
        g: rgb.g,
        b: rgb.b,
    }
}

/// e.g. `8/12 lit`, with the declared count when it disagrees with the data.
pub fn strip_summary(frame: &ColorFrame) -> String {
    let lit = frame
        .colors
        .iter()
        .filter(|c| c.r > 0 || c.g > 0 || c.b > 0)
        .count();
    if frame.declared_count == frame.colors.len() {
        format!("{}/{} lit", lit, frame.colors.len())
    } else {
        format!(
            "{}/{} lit (declared {})",
            lit,
            frame.colors.len(),
            frame.declared_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CanFrame;

    fn strip(declared: usize, colors: &[(u8, u8, u8)]) -> ColorFrame {
        ColorFrame {
            declared_count: declared,
            colors: colors.iter().copied().map(Rgb::from).collect(),
        }
    }

    #[test]
    fn test_summary() {
        assert_eq!(strip_summary(&strip(3, &[(255, 0, 0), (0, 0, 0), (0, 0, 1)])), "2/3 lit");
        assert_eq!(strip_summary(&strip(4, &[(0, 0, 0)])), "0/1 lit (declared 4)");
        assert_eq!(strip_summary(&strip(0, &[])), "0/0 lit");
    }

    #[test]
    fn test_renders_true_colour_cells() {
        let mut monitor = StripMonitor::new(Vec::new());
        monitor
            .handle(&InboundLine::Colors(strip(2, &[(255, 0, 0), (0, 128, 0)])))
            .unwrap();
        let out = String::from_utf8(monitor.into_inner()).unwrap();
        assert!(out.contains("48;2;255;0;0"));
        assert!(out.contains("48;2;0;128;0"));
        assert!(out.contains("2/2 lit"));
    }

    #[test]
    fn test_diagnostic_redraws_strip() {
        let mut monitor = StripMonitor::new(Vec::new());
        monitor
            .handle(&InboundLine::Colors(strip(1, &[(0, 0, 255)])))
            .unwrap();
        monitor
            .handle(&InboundLine::Diagnostic("Boot ok".to_string()))
            .unwrap();
        assert_eq!(monitor.frames(), 1);
        assert_eq!(monitor.diagnostics(), 1);

        let out = String::from_utf8(monitor.into_inner()).unwrap();
        let after = &out[out.find("> Boot ok").unwrap()..];
        assert!(after.contains("48;2;0;0;255"));
    }

    #[test]
    fn test_bus_frame_scrolls_above_strip() {
        let mut monitor = StripMonitor::new(Vec::new());
        monitor
            .handle(&InboundLine::Colors(strip(1, &[(0, 255, 0)])))
            .unwrap();
        monitor
            .handle(&InboundLine::Frame(CanFrame::new(0x5F0, vec![0x20, 0x03])))
            .unwrap();
        assert_eq!(monitor.bus_frames(), 1);
        assert_eq!(monitor.diagnostics(), 0);

        let out = String::from_utf8(monitor.into_inner()).unwrap();
        let after = &out[out.find("< 0x5F0 [2] 2003").unwrap()..];
        assert!(after.contains("48;2;0;255;0"));
    }
}
