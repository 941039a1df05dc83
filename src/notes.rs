//! Value tables for the musical data columns: note names, scale names,
//! motion (CC sweep) values, and the quant-denominated note lengths.
//!
//! Tables that feed a keypad column reserve index 0 for the [`NA`] sentinel
//! and intersperse a [`NEXT`] paging marker every `n_keys - 1` entries, so a
//! column offset of 0 always addresses "nothing" and paging never lands
//! between markers.

use crate::config::RunConfig;

/// Sentinel marking an empty keypad slot; row 0 of every paged column.
pub const NA: &str = "NA";
/// Paging marker inside keypad columns.
pub const NEXT: &str = "Next";

const NATURALS: [(&str, u8); 7] = [
    ("C", 0),
    ("D", 2),
    ("E", 4),
    ("F", 5),
    ("G", 7),
    ("A", 9),
    ("B", 11),
];

const MAJOR_KEYS: [&str; 15] = [
    "Cb", "Gb", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#",
];

const MINOR_KEYS: [&str; 15] = [
    "ab", "eb", "bb", "f", "c", "g", "d", "a", "e", "b", "f#", "c#", "g#", "d#", "a#",
];

/// Note lengths in quants, in keypad order. `Full` equals one step at the
/// default `n_quants = 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidLength {
    Zero = 0,
    Full = 4,
    Half = 2,
    Quarter = 1,
    Double = 8,
    Quadruple = 16,
}

/// Largest representable length; duration conversion clamps to this.
pub const MAX_LENGTH_QUANTS: u64 = ValidLength::Quadruple as u64;

pub fn length_values() -> Vec<String> {
    [
        ValidLength::Zero,
        ValidLength::Full,
        ValidLength::Half,
        ValidLength::Quarter,
        ValidLength::Double,
        ValidLength::Quadruple,
    ]
    .iter()
    .map(|l| (*l as u64).to_string())
    .collect()
}

fn with_paging(head: &str, entries: Vec<String>, n_keys: u8) -> Vec<String> {
    let span = (n_keys.max(2) - 1) as usize;
    let mut out = vec![head.to_string()];
    for (i, entry) in entries.iter().enumerate() {
        out.push(entry.clone());
        if (i + 1) % span == 0 {
            out.push(NEXT.to_string());
        }
    }
    if out.last().map(String::as_str) != Some(NEXT) {
        out.push(NEXT.to_string());
    }
    out
}

/// Note-name column: `C-1 .. B-{octaves}` with NA/Next plumbing.
pub fn note_values(cfg: &RunConfig) -> Vec<String> {
    let mut plain = Vec::new();
    for octave in 1..=cfg.octaves {
        for (name, _) in NATURALS {
            plain.push(format!("{name}-{octave}"));
        }
    }
    with_paging(NA, plain, cfg.n_keys)
}

/// Scale-name column: C first, then the circle-of-fifths majors and minors.
pub fn scale_values() -> Vec<String> {
    let mut out = vec!["C".to_string()];
    out.extend(MAJOR_KEYS.iter().map(|s| s.to_string()));
    out.extend(MINOR_KEYS.iter().map(|s| s.to_string()));
    out
}

/// Motion column for CC sweeps: `n_motions` values quantized over 0..=127,
/// with the same NA/Next plumbing as the note table.
pub fn motion_values(cfg: &RunConfig) -> Vec<String> {
    let n = cfg.n_motions.max(2) as f64;
    let plain = (1..cfg.n_motions)
        .map(|i| ((i as f64 / n) * 127.0).round() as u8)
        .map(|v| v.to_string())
        .collect();
    with_paging(NA, plain, cfg.n_keys)
}

/// MIDI number of a note name such as `C-4` or `F#-2` (`C-4` = 60).
/// Returns `None` for sentinels and anything else that is not a note.
pub fn note_number(name: &str) -> Option<u8> {
    let (pitch, octave) = name.split_once('-')?;
    let octave: i16 = octave.parse().ok()?;
    let mut chars = pitch.chars();
    let letter = chars.next()?;
    let mut semitone = NATURALS
        .iter()
        .find(|(n, _)| n.starts_with(letter))
        .map(|(_, s)| *s as i16)?;
    for accidental in chars {
        match accidental {
            '#' => semitone += 1,
            'b' => semitone -= 1,
            _ => return None,
        }
    }
    let number = 12 * (octave + 1) + semitone;
    u8::try_from(number).ok().filter(|n| *n < 128)
}
