//! Input event templates: rule rows that recognize incoming MIDI and the
//! output specifications they synthesize once a full match accumulates.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::mode::out::OutMode;
use crate::mode::Catalog;
use crate::notes::MAX_LENGTH_QUANTS;

/// Normalized incoming message: `[status, data1, data2, reserved, channel]`.
pub const MSG_LEN: usize = 5;
pub type InMessage = [u8; MSG_LEN];

const NANOS_PER_MIN: u64 = 60_000_000_000;

/// One predicate of a rule row, applied positionally to a normalized
/// message byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Byte equals the value.
    Equal(u8),
    /// Byte at least the value; a hit flips the row outcome to
    /// "accept and rotate the output specifications".
    AtLeastOrRotate(u8),
    /// Byte equals the same byte of the previously accepted message.
    MatchPrevious,
    Wildcard,
}

// On disk the predicates keep their original scalar forms: positive int,
// negative int, "match", "".
impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Rule::Equal(v) => serializer.serialize_i64(*v as i64),
            Rule::AtLeastOrRotate(v) => serializer.serialize_i64(-(*v as i64)),
            Rule::MatchPrevious => serializer.serialize_str("match"),
            Rule::Wildcard => serializer.serialize_str(""),
        }
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Scalar {
            Int(i64),
            Str(String),
        }
        match Scalar::deserialize(deserializer)? {
            Scalar::Int(v) if v > 0 => Ok(Rule::Equal(v.clamp(0, 255) as u8)),
            Scalar::Int(v) => Ok(Rule::AtLeastOrRotate(v.unsigned_abs().min(255) as u8)),
            Scalar::Str(s) if s == "match" => Ok(Rule::MatchPrevious),
            Scalar::Str(s) if s.is_empty() => Ok(Rule::Wildcard),
            Scalar::Str(s) => Err(D::Error::custom(format!("unknown rule predicate {s:?}"))),
        }
    }
}

/// Output specification paired with a rule row: which out mode to clone and
/// the logical endpoint to route it to (`-1` defers to the edit cursor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, i32, i32)", into = "(String, i32, i32)")]
pub struct OutRule {
    pub mode: String,
    pub midi_id: i32,
    pub channel: i32,
}

impl From<(String, i32, i32)> for OutRule {
    fn from((mode, midi_id, channel): (String, i32, i32)) -> Self {
        OutRule { mode, midi_id, channel }
    }
}

impl From<OutRule> for (String, i32, i32) {
    fn from(r: OutRule) -> Self {
        (r.mode, r.midi_id, r.channel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InModeTemplate {
    pub name: String,
    pub in_rules: Vec<Vec<Rule>>,
    pub out_rules: Vec<OutRule>,
    /// Serialized empty; instances keep their own rolling buffer.
    #[serde(default)]
    pub data: Vec<Vec<i64>>,
    pub instruments: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl InModeTemplate {
    pub fn instantiate(self: &Arc<Self>, now: u64) -> InMode {
        InMode {
            out_rules: self.out_rules.iter().cloned().collect(),
            data: Vec::new(),
            t_1: now,
            t_2: 0,
            exe: 0,
            template: Arc::clone(self),
        }
    }
}

/// Match state of one in-mode on one input port.
#[derive(Debug, Clone)]
pub struct InMode {
    template: Arc<InModeTemplate>,
    out_rules: VecDeque<OutRule>,
    data: Vec<InMessage>,
    /// Arrival of the first matched message, nanoseconds.
    t_1: u64,
    /// Arrival of the last matched message, nanoseconds.
    t_2: u64,
    exe: usize,
}

/// Rewrites raw driver bytes to the 5-element normalized form.
pub fn normalize(raw: &[u8]) -> Option<InMessage> {
    let status = *raw.first()?;
    Some([
        status & 0xF0,
        raw.get(1).copied().unwrap_or(0),
        raw.get(2).copied().unwrap_or(0),
        0,
        (status & 0x0F) + 1,
    ])
}

impl InMode {
    pub fn name(&self) -> &str {
        &self.template.name
    }

    /// True while rule rows remain unmatched.
    pub fn has_next(&self) -> bool {
        self.exe < self.template.in_rules.len()
    }

    /// Evaluates the current rule row against `message` at `(t_now, t_delta)`
    /// nanoseconds. On a hit the message joins the rolling buffer and the
    /// row counter advances; a rotate outcome additionally cycles the head
    /// output specification to the tail.
    pub fn set_with_message_and_time(&mut self, message: &InMessage, t: (u64, u64)) {
        if self.exe >= self.template.in_rules.len() {
            return;
        }
        self.apply_time(t);
        let applied = rules_apply(
            &self.template.in_rules[self.exe],
            message,
            self.data.last(),
        );
        if applied != 0 {
            self.data.push(*message);
            self.exe += 1;
            if applied < 0 {
                if let Some(head) = self.out_rules.pop_front() {
                    self.out_rules.push_back(head);
                }
            }
        }
    }

    fn apply_time(&mut self, (t_now, t_delta): (u64, u64)) {
        if self.exe == 0 {
            self.t_1 = t_now;
        } else if t_delta > 0 {
            self.t_2 = self.t_1 + t_delta;
        } else {
            self.t_2 = t_now;
        }
    }

    pub fn reset(&mut self) {
        self.exe = 0;
        self.t_1 = 0;
        self.t_2 = 0;
        self.data.clear();
    }

    /// Converts the accumulated messages into an out-mode instance: clone
    /// the head output specification's template, copy every wire column of
    /// each captured row, and override row 0's Length with the captured
    /// duration in quants. Resets the match state either way.
    pub fn convert_with_out_modes_and_tempo(
        &mut self,
        catalog: &Catalog,
        tempo: u32,
        n_quants: u8,
    ) -> Option<(i32, i32, OutMode)> {
        let head = self.out_rules.front().cloned();
        let result = head.and_then(|head| {
            let template = catalog.out(&head.mode)?;
            let mut out = template.instantiate();
            out.reset_offsets(0);

            let duration = self.t_2.saturating_sub(self.t_1);
            let quant = NANOS_PER_MIN / (tempo as u64 * n_quants as u64);
            let mut length = duration.div_ceil(quant);
            if length > MAX_LENGTH_QUANTS {
                log::debug!(
                    "{}: duration {duration}ns overflows, clamping to {MAX_LENGTH_QUANTS} quants",
                    self.template.name
                );
                length = MAX_LENGTH_QUANTS;
            }
            if let Some(first) = self.data.first_mut() {
                first[3] = length as u8;
            }

            let labels: Vec<String> = out.labels().to_vec();
            for (row, message) in self.data.iter().enumerate().take(self.exe) {
                for (i, label) in labels.iter().enumerate().take(MSG_LEN) {
                    if label != "Note" && label != "Scale" && label != "Button" {
                        let _ = out.set_indexes_with_lab_and_val(
                            label,
                            &message[i].to_string(),
                            Some(row),
                        );
                    }
                }
            }
            // arm the keypad column from the captured key, so the step is
            // not skipped as empty when it comes back around on schedule
            let out_template = out.template().clone();
            if let (Ok(note_col), Some(first)) =
                (out_template.col("Note"), self.data.first())
            {
                if let Some(name) = out_template.data[note_col]
                    .iter()
                    .find(|n| crate::notes::note_number(n) == Some(first[1]))
                {
                    let _ = out.set_indexes_with_lab_and_val("Note", name, None);
                }
            }
            Some((head.midi_id, head.channel, out))
        });
        self.reset();
        result
    }
}

fn rules_apply(rules: &[Rule], message: &InMessage, prev: Option<&InMessage>) -> i32 {
    let mut all = 1i32;
    for (i, rule) in rules.iter().enumerate() {
        let byte = message.get(i).copied().unwrap_or(0);
        match rule {
            Rule::Equal(v) => all *= i32::from(byte == *v),
            Rule::AtLeastOrRotate(v) => {
                if byte >= *v {
                    all = -all;
                }
            }
            Rule::MatchPrevious => match prev {
                Some(p) => all *= i32::from(byte == p[i]),
                None => all = 0,
            },
            Rule::Wildcard => {}
        }
    }
    all
}
