// Outbound messages: runtime -> host
//
// Each message carries a terse format string describing its fields
// ('c' = 1 byte, 'h' = i16, 'f' = f32), a tag byte and a packed
// little-endian payload. On the wire:
//
//   [len][format bytes][0x00][tag][payload]     len = format + NUL + tag + payload

/// Reply letter for rejected input
pub const BAD_INPUT: u8 = b'?';

/// Tag for warnings and diagnostics
pub const WARNING_TAG: u8 = b'!';

const CHAR_FORMATS: &str = "cccccccccccccccc";

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    format: &'static str,
    tag: u8,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(format: &'static str, tag: u8) -> Self {
        Self {
            format,
            tag,
            payload: Vec::with_capacity(16),
        }
    }

    pub fn with_u8(mut self, value: u8) -> Self {
        self.payload.push(value);
        self
    }

    pub fn with_i16(mut self, value: i16) -> Self {
        self.payload.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn with_f32(mut self, value: f32) -> Self {
        self.payload.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn with_bytes(mut self, bytes: &[u8]) -> Self {
        self.payload.extend_from_slice(bytes);
        self
    }

    pub fn format(&self) -> &'static str {
        self.format
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// `{cmd, '?'}`
    pub fn bad_input(cmd: u8) -> Self {
        Self::new("cc", cmd).with_u8(BAD_INPUT)
    }

    /// `"cf"`: a single float result
    pub fn float(tag: u8, value: f32) -> Self {
        Self::new("cf", tag).with_f32(value)
    }

    /// `"ccf"`: time report for timer `action`
    pub fn time(tag: u8, action: u8, seconds: f32) -> Self {
        Self::new("ccf", tag).with_u8(action).with_f32(seconds)
    }

    /// Battery below the motor threshold but still powered
    pub fn battery_low(volts: f32) -> Self {
        Self::new("ccccccccf", WARNING_TAG)
            .with_bytes(b"BAT LOW")
            .with_f32(volts)
    }

    /// Battery so low the board is probably running from the host
    pub fn power_off(volts: f32) -> Self {
        Self::new("ccccccccccf", WARNING_TAG)
            .with_bytes(b"POWER OFF")
            .with_f32(volts)
    }

    /// Short ASCII text after the tag, one 'c' per character
    pub fn text(tag: u8, text: &str) -> Self {
        let len = (text.len() + 1).min(CHAR_FORMATS.len());
        Self::new(&CHAR_FORMATS[..len], tag).with_bytes(&text.as_bytes()[..len - 1])
    }

    pub fn encoded_len(&self) -> usize {
        1 + self.format.len() + 1 + 1 + self.payload.len()
    }

    /// Frame for the wire
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push((self.encoded_len() - 1) as u8);
        out.extend_from_slice(self.format.as_bytes());
        out.push(0);
        out.push(self.tag);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse one framed message from the front of `bytes`, returning the
    /// tag, the format and the payload, plus the number of bytes used.
    pub fn decode_frame(bytes: &[u8]) -> Option<(DecodedFrame<'_>, usize)> {
        let len = *bytes.first()? as usize;
        let frame = bytes.get(1..1 + len)?;
        let nul = frame.iter().position(|&b| b == 0)?;
        let format = std::str::from_utf8(&frame[..nul]).ok()?;
        let tag = *frame.get(nul + 1)?;
        let payload = &frame[nul + 2..];
        Some((
            DecodedFrame {
                format,
                tag,
                payload,
            },
            len + 1,
        ))
    }
}

/// A message read back from the wire (host side)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedFrame<'a> {
    pub format: &'a str,
    pub tag: u8,
    pub payload: &'a [u8],
}

impl DecodedFrame<'_> {
    /// Render fields per the format string, skipping the tag
    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut rest = self.payload;
        for kind in self.format.chars().skip(1) {
            match kind {
                'c' if !rest.is_empty() => {
                    let b = rest[0];
                    out.push(if b.is_ascii_graphic() || b == b' ' {
                        (b as char).to_string()
                    } else {
                        format!("0x{:02X}", b)
                    });
                    rest = &rest[1..];
                }
                'h' if rest.len() >= 2 => {
                    out.push(i16::from_le_bytes([rest[0], rest[1]]).to_string());
                    rest = &rest[2..];
                }
                'f' if rest.len() >= 4 => {
                    out.push(f32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]).to_string());
                    rest = &rest[4..];
                }
                _ => break,
            }
        }
        out
    }
}
