//! Text layout for the lens display.
//!
//! A screen shows `sum(lines_per_screen)` lines, transmitted as one packet
//! per configured part. With the default `[3, 2]` layout the first packet
//! carries three lines and the second carries two.

use crate::config::PaginatorConfig;

/// Width of a string in pixels.
pub trait TextMeasurer: Send + Sync {
    fn measure(&self, text: &str) -> f32;
}

impl<F> TextMeasurer for F
where
    F: Fn(&str) -> f32 + Send + Sync,
{
    fn measure(&self, text: &str) -> f32 {
        self(text)
    }
}

/// Every character advances by the same amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedAdvance {
    pub advance_px: f32,
}

impl FixedAdvance {
    /// Average glyph advance of the lens font relative to its size
    const ADVANCE_RATIO: f32 = 0.5;

    pub fn for_font_size(font_size_px: u32) -> Self {
        Self { advance_px: font_size_px as f32 * Self::ADVANCE_RATIO }
    }
}

impl TextMeasurer for FixedAdvance {
    fn measure(&self, text: &str) -> f32 {
        text.chars().count() as f32 * self.advance_px
    }
}

/// Lines for one part of one screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub screen_index: usize,
    pub part_index: usize,
    pub lines: Vec<String>,
}

impl Packet {
    /// Lines joined by `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.text().into_bytes()
    }

    pub fn is_blank(&self) -> bool {
        self.lines.iter().all(|line| line.trim().is_empty())
    }
}

/// Ordered packets covering a whole message. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub packets: Vec<Packet>,
}

impl Pagination {
    pub fn total_pages(&self) -> usize {
        self.packets.len().max(1)
    }

    /// Number of screens (a screen spans one packet per part).
    pub fn screen_count(&self) -> usize {
        self.packets.last().map_or(1, |p| p.screen_index + 1)
    }

    /// Split each packet's bytes into slices of at most `capacity` bytes.
    ///
    /// A slice never spans two packets. A packet with no bytes yields one
    /// empty slice.
    pub fn to_byte_arrays(&self, capacity: usize) -> Vec<Vec<u8>> {
        let capacity = capacity.max(1);
        let mut frames = Vec::new();
        for packet in &self.packets {
            let bytes = packet.to_bytes();
            if bytes.is_empty() {
                frames.push(Vec::new());
                continue;
            }
            frames.extend(bytes.chunks(capacity).map(<[u8]>::to_vec));
        }
        if frames.is_empty() {
            frames.push(Vec::new());
        }
        frames
    }
}

pub struct TextPaginator {
    width_px: f32,
    slots: Vec<usize>,
    measurer: Box<dyn TextMeasurer>,
}

impl std::fmt::Debug for TextPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextPaginator")
            .field("width_px", &self.width_px)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl TextPaginator {
    /// Paginator measuring with a fixed advance derived from the font size.
    pub fn new(config: &PaginatorConfig) -> Self {
        Self::with_measurer(config, FixedAdvance::for_font_size(config.font_size_px))
    }

    pub fn with_measurer(config: &PaginatorConfig, measurer: impl TextMeasurer + 'static) -> Self {
        let mut slots: Vec<usize> = config.lines_per_screen.iter().map(|&n| n.max(1)).collect();
        if slots.is_empty() {
            slots.push(1);
        }
        Self { width_px: config.target_width_px as f32, slots, measurer: Box::new(measurer) }
    }

    /// Slot count per part, each at least one.
    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    pub fn lines_per_screen(&self) -> usize {
        self.slots.iter().sum()
    }

    pub fn paginate(&self, message: &str) -> Pagination {
        let normalized = message.replace("\r\n", "\n").replace('\r', "\n");
        let lines: Vec<String> = normalized.split('\n').flat_map(|p| self.wrap(p)).collect();

        let per_screen = self.lines_per_screen();
        let mut packets = Vec::new();
        for (screen_index, screen) in lines.chunks(per_screen).enumerate() {
            self.push_screen(&mut packets, screen_index, screen);
        }
        if packets.is_empty() {
            self.push_screen(&mut packets, 0, &[]);
        }
        Pagination { packets }
    }

    fn push_screen(&self, packets: &mut Vec<Packet>, screen_index: usize, screen: &[String]) {
        let mut offset = 0;
        for (part_index, &count) in self.slots.iter().enumerate() {
            let lines = (offset..offset + count)
                .map(|i| screen.get(i).cloned().unwrap_or_default())
                .collect();
            packets.push(Packet { screen_index, part_index, lines });
            offset += count;
        }
    }

    /// Greedy wrap of one paragraph. Always yields at least one line.
    fn wrap(&self, paragraph: &str) -> Vec<String> {
        if paragraph.is_empty() {
            return vec![String::new()];
        }
        let mut lines = Vec::new();
        let mut current = String::new();
        // Byte offset of the last whitespace char in `current`
        let mut last_space: Option<usize> = None;

        for ch in paragraph.chars() {
            current.push(ch);
            if ch.is_whitespace() {
                last_space = Some(current.len() - ch.len_utf8());
            }
            if self.measurer.measure(&current) <= self.width_px {
                continue;
            }

            match last_space {
                Some(at) => {
                    let split = at + current[at..].chars().next().map_or(1, char::len_utf8);
                    lines.push(current[..split].trim_end().to_string());
                    current = current[split..].trim_start().to_string();
                }
                None if current.chars().count() > 1 => {
                    let overflow = current.pop();
                    lines.push(std::mem::take(&mut current));
                    current.extend(overflow);
                }
                None => lines.push(std::mem::take(&mut current)),
            }
            last_space = current.char_indices().filter(|(_, c)| c.is_whitespace()).last().map(|(i, _)| i);
        }

        let tail = current.trim_end();
        if !tail.is_empty() || lines.is_empty() {
            lines.push(tail.to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten_px_paginator() -> TextPaginator {
        let config = PaginatorConfig { target_width_px: 30, font_size_px: 21, lines_per_screen: vec![3, 2] };
        TextPaginator::with_measurer(&config, |text: &str| text.chars().count() as f32 * 10.0)
    }

    fn lines(packet: &Packet) -> Vec<&str> {
        packet.lines.iter().map(String::as_str).collect()
    }

    #[test]
    fn splits_words_into_three_plus_two_packets() {
        let result = ten_px_paginator().paginate("A1 B2 C3 D4 E5 F6 G7 H8 I9");

        assert_eq!(result.packets.len(), 4);
        assert_eq!(lines(&result.packets[0]), ["A1", "B2", "C3"]);
        assert_eq!(lines(&result.packets[1]), ["D4", "E5"]);
        assert_eq!(lines(&result.packets[2]), ["F6", "G7", "H8"]);
        assert_eq!(lines(&result.packets[3]), ["I9", ""]);
        assert_eq!(result.screen_count(), 2);
        assert_eq!((result.packets[3].screen_index, result.packets[3].part_index), (1, 1));

        let frames = result.to_byte_arrays(64);
        assert_eq!(frames, vec![b"A1\nB2\nC3".to_vec(), b"D4\nE5".to_vec(), b"F6\nG7\nH8".to_vec(), b"I9\n".to_vec()]);
    }

    #[test]
    fn empty_input_is_one_blank_screen() {
        let result = ten_px_paginator().paginate("");
        assert_eq!(result.packets.len(), 2);
        assert_eq!(lines(&result.packets[0]), ["", "", ""]);
        assert_eq!(lines(&result.packets[1]), ["", ""]);
        assert!(result.packets.iter().all(Packet::is_blank));
        assert_eq!(result.to_byte_arrays(64), vec![b"\n\n".to_vec(), b"\n".to_vec()]);
    }

    #[test]
    fn byte_slices_never_span_packets() {
        let frames = ten_px_paginator().paginate("A1 B2 C3 D4 E5 F6 G7 H8 I9").to_byte_arrays(5);
        let expected = ["A1\nB2", "\nC3", "D4\nE5", "F6\nG7", "\nH8", "I9\n"].map(|s| s.as_bytes().to_vec());
        assert_eq!(frames, expected);
    }

    #[test]
    fn long_words_are_force_broken() {
        let result = ten_px_paginator().paginate("ABCDEFG");
        assert_eq!(lines(&result.packets[0]), ["ABC", "DEF", "G"]);
    }

    #[test]
    fn explicit_newlines_start_new_lines() {
        let result = ten_px_paginator().paginate("A\r\n\rB");
        assert_eq!(lines(&result.packets[0]), ["A", "", "B"]);
    }

    #[test]
    fn degenerate_slot_config_is_clamped() {
        let config = PaginatorConfig { lines_per_screen: vec![], ..PaginatorConfig::default() };
        assert_eq!(TextPaginator::new(&config).slots(), &[1]);

        let config = PaginatorConfig { lines_per_screen: vec![0, 2], ..PaginatorConfig::default() };
        let paginator = TextPaginator::new(&config);
        assert_eq!(paginator.slots(), &[1, 2]);
        assert_eq!(paginator.lines_per_screen(), 3);
    }

    #[test]
    fn zero_capacity_is_treated_as_one() {
        let result = ten_px_paginator().paginate("AB");
        assert_eq!(result.to_byte_arrays(0).len(), b"AB\n\n".len() + 1);
    }

    #[test]
    fn default_measurer_fits_a_sentence_on_one_line() {
        let paginator = TextPaginator::new(&PaginatorConfig::default());
        let result = paginator.paginate("Turn left in 200 m");
        assert_eq!(result.packets[0].lines[0], "Turn left in 200 m");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn pagination_is_never_empty_and_respects_slots(
                text in "[a-zA-Z0-9 \n]{0,200}",
                slots in proptest::collection::vec(0usize..4, 0..4),
                width in 1u32..200,
            ) {
                let config = PaginatorConfig { target_width_px: width, font_size_px: 21, lines_per_screen: slots };
                let paginator = TextPaginator::with_measurer(&config, |t: &str| t.chars().count() as f32 * 10.0);
                let result = paginator.paginate(&text);

                prop_assert!(!result.packets.is_empty());
                prop_assert_eq!(result.packets.len() % paginator.slots().len(), 0);
                for packet in &result.packets {
                    prop_assert_eq!(packet.lines.len(), paginator.slots()[packet.part_index]);
                }
            }

            #[test]
            fn concatenated_slices_rebuild_each_packet(
                text in "\\PC{1,120}",
                capacity in 1usize..40,
            ) {
                let result = TextPaginator::new(&PaginatorConfig::default()).paginate(&text);
                let mut frames = result.to_byte_arrays(capacity).into_iter();
                for packet in &result.packets {
                    let bytes = packet.to_bytes();
                    let mut rebuilt = Vec::new();
                    if bytes.is_empty() {
                        prop_assert_eq!(frames.next(), Some(Vec::new()));
                        continue;
                    }
                    while rebuilt.len() < bytes.len() {
                        let frame = frames.next().unwrap_or_default();
                        prop_assert!(!frame.is_empty() && frame.len() <= capacity);
                        rebuilt.extend(frame);
                    }
                    prop_assert_eq!(rebuilt, bytes);
                }
                prop_assert_eq!(frames.next(), None);
            }
        }
    }
}
