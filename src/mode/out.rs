//! Output event templates and their mutable instances.
//!
//! A template describes one kind of MIDI event: its data columns (label +
//! value domain), the default multi-row execution (e.g. row 0 note-on,
//! row 1 note-off), keypad/waveform column selectors, and the instrument
//! tags that mappings match against. Templates live in the catalog behind
//! `Arc` and are never mutated; everything editable happens on an
//! [`OutMode`] instance produced by [`OutModeTemplate::instantiate`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqError};
use crate::notes;

/// Column labels that never reach the wire; they back the keypad and the
/// on-screen waveform instead.
pub const HIDDEN_LABELS: [&str; 3] = ["Note", "Scale", "Button"];

/// Rows of per-column indices into a template's value domains.
pub type Indexes = Vec<Vec<usize>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutModeTemplate {
    pub name: String,
    /// Default rows; one row per emission phase.
    pub indexes: Indexes,
    pub labels: Vec<String>,
    /// Per-column scroll offsets used by keypad paging.
    pub offsets: Vec<usize>,
    /// Per-column value domains, as strings.
    pub data: Vec<Vec<String>>,
    /// (row, column) backing the on-screen waveform.
    pub vis_ind: [usize; 2],
    /// (row, column) driven by the keypad.
    pub but_ind: [usize; 2],
    pub instruments: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl OutModeTemplate {
    pub fn col(&self, label: &str) -> Result<usize> {
        self.labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| SeqError::LabelNotFound(label.to_string()))
    }

    /// Label of the keypad-driven column.
    pub fn but_label(&self) -> &str {
        &self.labels[self.but_ind[1]]
    }

    /// Structural check used when a template arrives from disk: consistent
    /// column counts and every default index inside its domain.
    pub fn validate(&self) -> Result<()> {
        let cols = self.labels.len();
        let consistent = self.data.len() == cols
            && self.offsets.len() == cols
            && self.but_ind[1] < cols
            && self.vis_ind[1] < cols
            && self.indexes.iter().all(|row| row.len() == cols);
        if !consistent {
            return Err(SeqError::LabelNotFound(format!(
                "{}: inconsistent column shape",
                self.name
            )));
        }
        for row in &self.indexes {
            for (col, ind) in row.iter().enumerate() {
                if *ind >= self.data[col].len() {
                    return Err(SeqError::OffsetNotFound(format!(
                        "{}: index {ind} outside {}",
                        self.name, self.labels[col]
                    )));
                }
            }
        }
        Ok(())
    }

    /// A fresh instance carrying the default rows.
    pub fn instantiate(self: &Arc<Self>) -> OutMode {
        OutMode {
            indexes: self.indexes.clone(),
            offsets: self.offsets.clone(),
            exe: 0,
            template: Arc::clone(self),
        }
    }

    /// An instance carrying `indexes`, bounded by the template's row/column
    /// shape and clamped into each column's domain. Round-trips exactly for
    /// well-formed rows.
    pub fn instantiate_with(self: &Arc<Self>, indexes: &[Vec<usize>]) -> OutMode {
        let mut mode = self.instantiate();
        mode.set_indexes(indexes);
        mode
    }

    /// An instance with the keypad column set from the current page, as the
    /// front-end does on a key press.
    pub fn instantiate_at(
        self: &Arc<Self>,
        label: &str,
        sub_ind: usize,
        exe: Option<usize>,
    ) -> Result<OutMode> {
        let mut mode = self.instantiate();
        mode.set_indexes_with_lab_and_off(label, sub_ind, exe)?;
        Ok(mode)
    }
}

/// One mutable occurrence of a template: a step being edited, a scheduled
/// event awaiting emission, or a live echo. Carries only its own rows,
/// paging offsets and execution counter; everything else is read through
/// the shared template.
#[derive(Debug, Clone)]
pub struct OutMode {
    template: Arc<OutModeTemplate>,
    indexes: Indexes,
    offsets: Vec<usize>,
    exe: usize,
}

impl OutMode {
    pub fn name(&self) -> &str {
        &self.template.name
    }

    pub fn template(&self) -> &Arc<OutModeTemplate> {
        &self.template
    }

    pub fn labels(&self) -> &[String] {
        &self.template.labels
    }

    pub fn exe(&self) -> usize {
        self.exe
    }

    /// True while rows remain to emit.
    pub fn has_next(&self) -> bool {
        self.exe < self.indexes.len()
    }

    pub fn get_indexes(&self) -> Indexes {
        self.indexes.clone()
    }

    pub fn vis_ind(&self) -> [usize; 2] {
        self.template.vis_ind
    }

    pub fn but_label(&self) -> &str {
        self.template.but_label()
    }

    /// True when the keypad column of `row` still holds the NA sentinel,
    /// i.e. the step was never armed.
    pub fn button_is_na(&self, row: usize) -> bool {
        let col = self.template.but_ind[1];
        match self.indexes.get(row).and_then(|r| r.get(col)) {
            Some(ind) => self.template.data[col].get(*ind).map(String::as_str) == Some(notes::NA),
            None => true,
        }
    }

    pub fn reset_offsets(&mut self, off: usize) -> &mut Self {
        for o in self.offsets.iter_mut() {
            *o = off;
        }
        self
    }

    /// Cyclic keypad paging; wraps to 1 because offset 0 addresses the NA
    /// sentinel row.
    pub fn update_offsets_with_lab(&mut self, label: &str, by: usize) -> Result<()> {
        let col = self
            .template
            .col(label)
            .map_err(|_| SeqError::OffsetNotFound(label.to_string()))?;
        if self.offsets[col] + by >= self.template.data[col].len() {
            self.offsets[col] = 1;
        } else {
            self.offsets[col] += by;
        }
        Ok(())
    }

    /// Bounded copy: rows/columns beyond the template's shape are ignored,
    /// indices outside a column's domain are clamped to its last entry.
    pub fn set_indexes(&mut self, indexes: &[Vec<usize>]) {
        for (r, row) in indexes.iter().enumerate() {
            if r >= self.indexes.len() {
                break;
            }
            for (c, ind) in row.iter().enumerate() {
                if c >= self.indexes[r].len() {
                    break;
                }
                let max = self.template.data[c].len().saturating_sub(1);
                self.indexes[r][c] = (*ind).min(max);
            }
        }
    }

    /// Sets a column from the keypad: `sub_ind` is the key position within
    /// the current page. Selecting a note name also resolves its MIDI number
    /// into the parallel `Key` column.
    pub fn set_indexes_with_lab_and_off(
        &mut self,
        label: &str,
        sub_ind: usize,
        exe: Option<usize>,
    ) -> Result<()> {
        let col = self
            .template
            .col(label)
            .map_err(|_| SeqError::OffsetNotFound(label.to_string()))?;
        let ind = self.offsets[col] + sub_ind;
        if ind >= self.template.data[col].len() {
            return Ok(());
        }
        for r in 0..self.indexes.len() {
            if exe.is_none() || exe == Some(r) {
                self.indexes[r][col] = ind;
                if label == "Note" {
                    self.resolve_note_key(r);
                }
            }
        }
        Ok(())
    }

    /// Sets a column by value, snapping to the nearest entry for integer
    /// columns when the exact value is absent from the domain.
    pub fn set_indexes_with_lab_and_val(
        &mut self,
        label: &str,
        val: &str,
        exe: Option<usize>,
    ) -> Result<()> {
        let col = self.template.col(label)?;
        let domain = &self.template.data[col];
        let ind = match domain.iter().position(|v| v == val) {
            Some(ind) => Some(ind),
            None => closest_index(val, domain),
        };
        if let Some(ind) = ind {
            for r in 0..self.indexes.len() {
                if exe.is_none() || exe == Some(r) {
                    self.indexes[r][col] = ind;
                }
            }
        }
        Ok(())
    }

    pub fn row_values(&self, row: usize) -> Vec<&str> {
        match self.indexes.get(row) {
            Some(r) => r
                .iter()
                .enumerate()
                .map(|(col, ind)| self.template.data[col][*ind].as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Value of `label` in `row`; NA when the row does not exist.
    pub fn value_by_lab(&self, row: usize, label: &str) -> Result<&str> {
        let col = self.template.col(label)?;
        Ok(self
            .indexes
            .get(row)
            .map(|r| self.template.data[col][r[col]].as_str())
            .unwrap_or(notes::NA))
    }

    /// Value `ind` positions into the current page of `label`'s column.
    pub fn value_by_off(&self, label: &str, ind: usize) -> Result<&str> {
        let col = self
            .template
            .col(label)
            .map_err(|_| SeqError::OffsetNotFound(label.to_string()))?;
        Ok(self
            .template
            .data[col]
            .get(self.offsets[col] + ind)
            .map(String::as_str)
            .unwrap_or(notes::NA))
    }

    /// Materializes the next row as integers, skipping the hidden columns,
    /// and advances the execution counter. A selected note name is resolved
    /// into the `Key` column before the row is read, so the wire always sees
    /// the MIDI number.
    pub fn get_as_message(&mut self) -> Vec<i64> {
        let mut message = Vec::new();
        if self.exe < self.indexes.len() {
            self.resolve_note_key(self.exe);
            for (col, ind) in self.indexes[self.exe].iter().enumerate() {
                let label = self.template.labels[col].as_str();
                if HIDDEN_LABELS.contains(&label) {
                    continue;
                }
                message.push(self.template.data[col][*ind].parse().unwrap_or(-1));
            }
        }
        self.exe += 1;
        message
    }

    fn resolve_note_key(&mut self, row: usize) {
        let (Ok(note_col), Ok(key_col)) = (self.template.col("Note"), self.template.col("Key"))
        else {
            return;
        };
        let Some(r) = self.indexes.get(row) else {
            return;
        };
        let note = &self.template.data[note_col][r[note_col]];
        if let Some(number) = notes::note_number(note) {
            let domain = &self.template.data[key_col];
            let value = number.to_string();
            let ind = domain
                .iter()
                .position(|v| *v == value)
                .or_else(|| closest_index(&value, domain));
            if let Some(ind) = ind {
                self.indexes[row][key_col] = ind;
            }
        }
    }
}

/// Index of the numerically-closest entry; `None` when `val` or the whole
/// domain is non-numeric. Ties keep the earlier entry.
fn closest_index(val: &str, domain: &[String]) -> Option<usize> {
    let target: i64 = val.parse().ok()?;
    let mut best: Option<(usize, i64)> = None;
    for (ind, entry) in domain.iter().enumerate() {
        if let Ok(v) = entry.parse::<i64>() {
            let dif = (target - v).abs();
            if best.map_or(true, |(_, d)| dif < d) {
                best = Some((ind, dif));
            }
        }
    }
    best.map(|(ind, _)| ind)
}
