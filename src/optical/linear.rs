//! Scanline decoder for EAN-13, UPC-A and EAN-8.
//!
//! A handful of rows are binarised around the mid-grey of each row and turned
//! into alternating bar/space runs. Digits are matched by their four run widths
//! normalised to seven modules, so the decoder tolerates any module size.

use tracing::trace;

use super::decoder::{CodeFormat, Decoded, SymbologyDecoder};
use crate::frame::LumaFrame;

/// Space/bar/space/bar widths of the L (odd parity) set; R uses the same widths
/// starting with a bar and G is each pattern reversed.
const L_WIDTHS: [[u8; 4]; 10] = [
    [3, 2, 1, 1],
    [2, 2, 2, 1],
    [2, 1, 2, 2],
    [1, 4, 1, 1],
    [1, 1, 3, 2],
    [1, 2, 3, 1],
    [1, 1, 1, 4],
    [1, 3, 1, 2],
    [1, 2, 1, 3],
    [3, 1, 1, 2],
];

/// Left-half parity sequence encoding the implicit first EAN-13 digit
const FIRST_DIGIT_PARITY: [&str; 10] = [
    "LLLLLL", "LLGLGG", "LLGGLG", "LLGGGL", "LGLLGG", "LGGLLG", "LGGGLL", "LGLGLG", "LGLGGL",
    "LGGLGL",
];

const MIN_CONTRAST: u8 = 40;
const MAX_DIGIT_ERROR: f32 = 1.2;
const MIN_QUIET_ZONE_MODULES: f32 = 5.0;
const EAN13_RUNS: usize = 59;
const EAN8_RUNS: usize = 43;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parity {
    L,
    G,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    dark: bool,
    width: u32,
}

/// EAN/UPC decoder sampling several horizontal scanlines
#[derive(Debug)]
pub struct EanDecoder {
    scan_rows: u32,
}

impl EanDecoder {
    pub fn new() -> Self {
        Self { scan_rows: 7 }
    }
}

impl Default for EanDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbologyDecoder for EanDecoder {
    fn name(&self) -> &'static str {
        "ean"
    }

    fn decode(&self, frame: &LumaFrame) -> Option<Decoded> {
        if frame.height == 0 || (frame.width as usize) < EAN8_RUNS || !frame.validate_size() {
            return None;
        }

        for k in 0..self.scan_rows {
            let y = (frame.height as u64 * (2 * k as u64 + 1) / (2 * self.scan_rows as u64)) as u32;
            let Some(mut runs) = row_runs(frame.row(y)) else {
                continue;
            };

            if let Some(decoded) = decode_runs(&runs) {
                trace!("Frame {}: {} on row {}", frame.id, decoded.format, y);
                return Some(decoded);
            }

            // upside-down label
            runs.reverse();
            if let Some(decoded) = decode_runs(&runs) {
                trace!("Frame {}: reversed {} on row {}", frame.id, decoded.format, y);
                return Some(decoded);
            }
        }

        None
    }
}

fn row_runs(row: &[u8]) -> Option<Vec<Run>> {
    let min = *row.iter().min()?;
    let max = *row.iter().max()?;
    if max - min < MIN_CONTRAST {
        return None;
    }

    let threshold = ((min as u16 + max as u16) / 2) as u8;
    let mut runs = Vec::new();
    let mut current = Run {
        dark: row[0] < threshold,
        width: 0,
    };

    for &value in row {
        let dark = value < threshold;
        if dark == current.dark {
            current.width += 1;
        } else {
            runs.push(current);
            current = Run { dark, width: 1 };
        }
    }
    runs.push(current);

    Some(runs)
}

fn decode_runs(runs: &[Run]) -> Option<Decoded> {
    (1..runs.len())
        .filter(|&start| runs[start].dark)
        .find_map(|start| decode_ean13_at(runs, start).or_else(|| decode_ean8_at(runs, start)))
}

/// Module width from the start guard, if a quiet zone precedes it
fn start_module(runs: &[Run], start: usize, needed: usize) -> Option<f32> {
    if start + needed > runs.len() || runs[start - 1].dark {
        return None;
    }

    let module = runs[start..start + 3].iter().map(|r| r.width).sum::<u32>() as f32 / 3.0;
    if (runs[start - 1].width as f32) < module * MIN_QUIET_ZONE_MODULES {
        return None;
    }
    if !guard_matches(&runs[start..start + 3], module) {
        return None;
    }

    Some(module)
}

fn guard_matches(runs: &[Run], module: f32) -> bool {
    runs.iter()
        .all(|r| (r.width as f32 - module).abs() <= module * 0.5 + 0.5)
}

fn match_digit(runs: &[Run], module: f32, allow_g: bool) -> Option<(u8, Parity)> {
    let total: u32 = runs.iter().map(|r| r.width).sum();
    let expected = module * 7.0;
    if (total as f32) < expected * 0.7 || (total as f32) > expected * 1.3 {
        return None;
    }

    let scale = 7.0 / total as f32;
    let mut best = None;
    let mut best_error = f32::MAX;

    for (digit, widths) in L_WIDTHS.iter().enumerate() {
        let candidates: &[Parity] = if allow_g { &[Parity::L, Parity::G] } else { &[Parity::L] };
        for &parity in candidates {
            let error: f32 = runs
                .iter()
                .enumerate()
                .map(|(i, run)| {
                    let pattern = match parity {
                        Parity::L => widths[i],
                        Parity::G => widths[3 - i],
                    };
                    (run.width as f32 * scale - pattern as f32).abs()
                })
                .sum();

            if error < best_error {
                best_error = error;
                best = Some((digit as u8, parity));
            }
        }
    }

    if best_error <= MAX_DIGIT_ERROR {
        best
    } else {
        None
    }
}

fn decode_digits(runs: &[Run], module: f32, allow_g: bool) -> Option<Vec<(u8, Parity)>> {
    runs.chunks_exact(4)
        .map(|chunk| match_digit(chunk, module, allow_g))
        .collect()
}

fn checksum_ok(digits: &[u8]) -> bool {
    let Some((&check, body)) = digits.split_last() else {
        return false;
    };
    let n = body.len();
    let sum: u32 = body
        .iter()
        .enumerate()
        .map(|(i, &d)| d as u32 * if (n - i) % 2 == 1 { 3 } else { 1 })
        .sum();
    (10 - sum % 10) % 10 == check as u32
}

fn to_code(digits: &[u8]) -> String {
    digits.iter().map(|d| char::from(b'0' + d)).collect()
}

fn decode_ean13_at(runs: &[Run], start: usize) -> Option<Decoded> {
    let module = start_module(runs, start, EAN13_RUNS)?;

    let left = decode_digits(&runs[start + 3..start + 27], module, true)?;
    if !guard_matches(&runs[start + 27..start + 32], module) {
        return None;
    }
    let right = decode_digits(&runs[start + 32..start + 56], module, false)?;
    if !guard_matches(&runs[start + 56..start + 59], module) {
        return None;
    }

    let parity: String = left
        .iter()
        .map(|(_, p)| if *p == Parity::L { 'L' } else { 'G' })
        .collect();
    let first = FIRST_DIGIT_PARITY.iter().position(|p| *p == parity)? as u8;

    let mut digits = Vec::with_capacity(13);
    digits.push(first);
    digits.extend(left.iter().map(|(d, _)| *d));
    digits.extend(right.iter().map(|(d, _)| *d));

    if !checksum_ok(&digits) {
        return None;
    }

    if first == 0 {
        Some(Decoded {
            code: to_code(&digits[1..]),
            format: CodeFormat::UpcA,
        })
    } else {
        Some(Decoded {
            code: to_code(&digits),
            format: CodeFormat::Ean13,
        })
    }
}

fn decode_ean8_at(runs: &[Run], start: usize) -> Option<Decoded> {
    let module = start_module(runs, start, EAN8_RUNS)?;

    let left = decode_digits(&runs[start + 3..start + 19], module, false)?;
    if !guard_matches(&runs[start + 19..start + 24], module) {
        return None;
    }
    let right = decode_digits(&runs[start + 24..start + 40], module, false)?;
    if !guard_matches(&runs[start + 40..start + 43], module) {
        return None;
    }

    let digits: Vec<u8> = left.iter().chain(right.iter()).map(|(d, _)| *d).collect();
    if !checksum_ok(&digits) {
        return None;
    }

    Some(Decoded {
        code: to_code(&digits),
        format: CodeFormat::Ean8,
    })
}
