//! HID report-descriptor parsing and field maps
//!
//! A report descriptor is a byte-encoded grammar describing the layout and semantics of
//! the reports a device exchanges with its host. This module walks that grammar and turns
//! it into a [`FieldMap`]: a flat table of addressable fields (bit offset, bit width,
//! signedness, logical range, usage), one per repetition of every Input item.
//!
//! The [`parse`] submodule contains the item-level parser. [`build_field_map`] drives it
//! and maintains the global/local item state the grammar requires.
//!
//! Only short items are handled. Long items (lead byte `0xFE`) are rejected; no input
//! device in this crate's scope emits them.
//!
//! [`build_field_map`] is a pure function of the descriptor bytes: the same input always
//! produces the same map, and nothing outside the return value is touched.

use crate::types::CanonicalValue;

/// Hard cap on the payload size of a single report shape, in bytes.
///
/// Matches the transport's per-report receive buffer. A descriptor whose fields would
/// place data beyond this bound is rejected rather than truncated.
pub const REPORT_BYTE_CAP: usize = 64;

/// Maximum number of fields (including padding fields) one field map can hold.
pub const MAX_FIELDS: usize = 64;

/// Maximum number of distinct report ids one descriptor may declare.
const MAX_REPORT_SHAPES: usize = 8;

/// Maximum number of explicitly listed Usage items between two main items.
const MAX_LOCAL_USAGES: usize = 16;

/// Collections may nest this deep. One Application collection at the top, with
/// Physical/Logical collections below it passed through.
const MAX_COLLECTION_DEPTH: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The byte stream ended in the middle of an item.
    Truncated,
    /// A long item (lead byte `0xFE`) was encountered.
    LongItem,
    /// Collections nest deeper than [`MAX_COLLECTION_DEPTH`].
    CollectionDepth,
    /// An End Collection item appeared with no collection open.
    StrayEndCollection,
    /// More than one top-level (Application) collection was declared.
    MultipleApplications,
    /// An Input item would place field data beyond [`REPORT_BYTE_CAP`].
    ReportTooLong,
    /// The descriptor declares more fields than [`MAX_FIELDS`].
    TooManyFields,
    /// The descriptor declares more report ids than [`MAX_REPORT_SHAPES`].
    TooManyReports,
    /// More Usage items between two main items than [`MAX_LOCAL_USAGES`].
    TooManyUsages,
}

/// One addressable field of one report shape. Produced by [`build_field_map`], never
/// mutated afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FieldDescriptor {
    pub usage_page: u16,
    pub usage: u16,
    pub report_id: u8,
    pub bit_offset: u16,
    pub bit_width: u8,
    pub logical_min: i32,
    pub logical_max: i32,
    pub is_signed: bool,
    /// Constant/padding field: consumes offset space but is skipped during normalization.
    pub is_padding: bool,
}

impl FieldDescriptor {
    const EMPTY: FieldDescriptor = FieldDescriptor {
        usage_page: 0,
        usage: 0,
        report_id: 0,
        bit_offset: 0,
        bit_width: 0,
        logical_min: 0,
        logical_max: 0,
        is_signed: false,
        is_padding: false,
    };

    /// Extract this field's value from a raw report buffer.
    ///
    /// The buffer is the report as received from the transport, including the leading
    /// report-id byte when the descriptor declares report ids (field offsets already
    /// account for it). Bits beyond the end of the buffer read as zero. At most 32 bits
    /// are read; wider fields are truncated.
    pub fn extract(&self, report: &[u8]) -> i32 {
        let width = self.bit_width.min(32) as usize;
        if width == 0 {
            return 0;
        }
        let mut value: u32 = 0;
        for i in 0..width {
            let bit = self.bit_offset as usize + i;
            let byte = bit / 8;
            if byte >= report.len() {
                break;
            }
            value |= (((report[byte] >> (bit % 8)) & 1) as u32) << i;
        }
        if self.is_signed && width < 32 && (value >> (width - 1)) & 1 == 1 {
            value |= u32::MAX << width;
        }
        value as i32
    }
}

/// Ordered sequence of [`FieldDescriptor`]s for one device interface.
///
/// Owned exclusively by the session entry of the device it was built for, and dropped
/// with it on disconnect.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FieldMap {
    fields: [FieldDescriptor; MAX_FIELDS],
    len: usize,
    uses_report_ids: bool,
}

impl FieldMap {
    pub(crate) fn empty() -> Self {
        Self {
            fields: [FieldDescriptor::EMPTY; MAX_FIELDS],
            len: 0,
            uses_report_ids: false,
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the descriptor declared report ids (and field offsets therefore start
    /// at bit 8, past the report-id byte).
    pub fn uses_report_ids(&self) -> bool {
        self.uses_report_ids
    }

    /// Decode all non-padding fields of the given report shape into `out`.
    ///
    /// Returns the number of values written. Pass `report_id` 0 for devices whose
    /// descriptor declares no report ids.
    pub fn decode_into(&self, report_id: u8, report: &[u8], out: &mut [CanonicalValue]) -> usize {
        let mut n = 0;
        for field in self.fields() {
            if field.report_id != report_id || field.is_padding {
                continue;
            }
            if n == out.len() {
                break;
            }
            out[n] = CanonicalValue {
                usage_page: field.usage_page,
                usage: field.usage,
                value: field.extract(report),
            };
            n += 1;
        }
        n
    }

    fn push(&mut self, field: FieldDescriptor) -> Result<(), ParseError> {
        if self.len == MAX_FIELDS {
            return Err(ParseError::TooManyFields);
        }
        self.fields[self.len] = field;
        self.len += 1;
        Ok(())
    }
}

// Global item state, carried across main items until overwritten.
struct Globals {
    usage_page: u16,
    logical_min: i32,
    logical_max_unsigned: u32,
    logical_max_signed: i32,
    report_size: u16,
    report_count: u16,
    report_id: u8,
}

impl Globals {
    fn new() -> Self {
        Self {
            usage_page: 0,
            logical_min: 0,
            logical_max_unsigned: 0,
            logical_max_signed: 0,
            report_size: 0,
            report_count: 0,
            report_id: 0,
        }
    }

    // Logical Maximum is read as unsigned unless Logical Minimum is negative; a
    // one-byte maximum of 0xFF means 255 for a 0-based range, not -1.
    fn logical_max(&self) -> i32 {
        if self.logical_min < 0 {
            self.logical_max_signed
        } else {
            i32::try_from(self.logical_max_unsigned).unwrap_or(i32::MAX)
        }
    }
}

// Local item state, reset after every main item.
struct Locals {
    usages: [u32; MAX_LOCAL_USAGES],
    usage_len: usize,
    usage_min: Option<u32>,
    usage_max: Option<u32>,
}

impl Locals {
    fn new() -> Self {
        Self {
            usages: [0; MAX_LOCAL_USAGES],
            usage_len: 0,
            usage_min: None,
            usage_max: None,
        }
    }

    fn clear(&mut self) {
        self.usage_len = 0;
        self.usage_min = None;
        self.usage_max = None;
    }

    fn push_usage(&mut self, usage: u32) -> Result<(), ParseError> {
        if self.usage_len == MAX_LOCAL_USAGES {
            return Err(ParseError::TooManyUsages);
        }
        self.usages[self.usage_len] = usage;
        self.usage_len += 1;
        Ok(())
    }

    // Usage for the i-th repetition of a main item: explicit usages are consumed in
    // order (the last one repeating if the report count exceeds them), a usage range
    // assigns sequential ids, and a missing usage yields 0.
    fn usage_for(&self, i: u16) -> u32 {
        if self.usage_len > 0 {
            let index = (i as usize).min(self.usage_len - 1);
            self.usages[index]
        } else if let Some(min) = self.usage_min {
            let usage = min.saturating_add(i as u32);
            match self.usage_max {
                Some(max) => usage.min(max),
                None => usage,
            }
        } else {
            0
        }
    }
}

// Bit-offset cursor for one report shape.
#[derive(Clone, Copy)]
struct ReportCursor {
    id: u8,
    bits: u16,
}

struct Cursors {
    entries: [ReportCursor; MAX_REPORT_SHAPES],
    len: usize,
}

impl Cursors {
    fn new() -> Self {
        Self {
            entries: [ReportCursor { id: 0, bits: 0 }; MAX_REPORT_SHAPES],
            len: 0,
        }
    }

    fn get(&mut self, id: u8, base: u16) -> Result<&mut ReportCursor, ParseError> {
        if let Some(index) = self.entries[..self.len].iter().position(|c| c.id == id) {
            return Ok(&mut self.entries[index]);
        }
        if self.len == MAX_REPORT_SHAPES {
            return Err(ParseError::TooManyReports);
        }
        self.entries[self.len] = ReportCursor { id, bits: base };
        self.len += 1;
        Ok(&mut self.entries[self.len - 1])
    }
}

/// Build a [`FieldMap`] from raw report-descriptor bytes.
///
/// On error the caller must not register the device; a rejected descriptor leaves no
/// partial state behind.
pub fn build_field_map(bytes: &[u8]) -> Result<FieldMap, ParseError> {
    let mut map = FieldMap::empty();
    let mut globals = Globals::new();
    let mut locals = Locals::new();
    let mut cursors = Cursors::new();
    let mut depth = 0usize;
    let mut seen_application = false;

    let mut input = bytes;
    while !input.is_empty() {
        if input[0] == parse::LONG_ITEM_PREFIX {
            return Err(ParseError::LongItem);
        }
        let (rest, item) = parse::short_item(input).map_err(|_| ParseError::Truncated)?;
        input = rest;

        match (item.class(), item.tag()) {
            (parse::ItemClass::Main, parse::TAG_COLLECTION) => {
                if depth == 0 {
                    if seen_application {
                        return Err(ParseError::MultipleApplications);
                    }
                    seen_application = true;
                }
                depth += 1;
                if depth > MAX_COLLECTION_DEPTH {
                    return Err(ParseError::CollectionDepth);
                }
                locals.clear();
            }
            (parse::ItemClass::Main, parse::TAG_END_COLLECTION) => {
                if depth == 0 {
                    return Err(ParseError::StrayEndCollection);
                }
                depth -= 1;
                locals.clear();
            }
            (parse::ItemClass::Main, parse::TAG_INPUT) => {
                emit_fields(&mut map, &globals, &locals, &mut cursors, item.value())?;
                locals.clear();
            }
            (parse::ItemClass::Main, parse::TAG_OUTPUT | parse::TAG_FEATURE) => {
                // Output and Feature items describe host-to-device data; they are not part
                // of the input field map and consume no input offset space.
                locals.clear();
            }
            (parse::ItemClass::Global, parse::TAG_USAGE_PAGE) => {
                globals.usage_page = item.value() as u16;
            }
            (parse::ItemClass::Global, parse::TAG_LOGICAL_MINIMUM) => {
                globals.logical_min = item.signed_value();
            }
            (parse::ItemClass::Global, parse::TAG_LOGICAL_MAXIMUM) => {
                globals.logical_max_unsigned = item.value();
                globals.logical_max_signed = item.signed_value();
            }
            (parse::ItemClass::Global, parse::TAG_REPORT_SIZE) => {
                globals.report_size = item.value() as u16;
            }
            (parse::ItemClass::Global, parse::TAG_REPORT_ID) => {
                map.uses_report_ids = true;
                globals.report_id = item.value() as u8;
            }
            (parse::ItemClass::Global, parse::TAG_REPORT_COUNT) => {
                globals.report_count = item.value() as u16;
            }
            (parse::ItemClass::Local, parse::TAG_USAGE) => {
                locals.push_usage(item.value())?;
            }
            (parse::ItemClass::Local, parse::TAG_USAGE_MINIMUM) => {
                locals.usage_min = Some(item.value());
            }
            (parse::ItemClass::Local, parse::TAG_USAGE_MAXIMUM) => {
                locals.usage_max = Some(item.value());
            }
            // Physical range, unit, push/pop, designators, strings: not relevant to
            // field layout, skipped.
            _ => {}
        }
    }

    Ok(map)
}

fn emit_fields(
    map: &mut FieldMap,
    globals: &Globals,
    locals: &Locals,
    cursors: &mut Cursors,
    input_flags: u32,
) -> Result<(), ParseError> {
    const FLAG_CONSTANT: u32 = 1 << 0;

    let is_padding = input_flags & FLAG_CONSTANT != 0;
    let is_signed = globals.logical_min < 0;
    let logical_max = globals.logical_max();
    let base = if map.uses_report_ids { 8 } else { 0 };
    let cursor = cursors.get(globals.report_id, base)?;

    for i in 0..globals.report_count {
        let bit_offset = cursor.bits;
        let end = bit_offset as usize + globals.report_size as usize;
        if end > REPORT_BYTE_CAP * 8 {
            return Err(ParseError::ReportTooLong);
        }
        cursor.bits = end as u16;

        let (usage_page, usage) = if is_padding {
            (0, 0)
        } else {
            let raw = locals.usage_for(i);
            // A 4-byte Usage item carries its own page in the high word.
            if raw >> 16 != 0 {
                ((raw >> 16) as u16, raw as u16)
            } else {
                (globals.usage_page, raw as u16)
            }
        };

        map.push(FieldDescriptor {
            usage_page,
            usage,
            report_id: globals.report_id,
            bit_offset,
            bit_width: globals.report_size.min(255) as u8,
            logical_min: globals.logical_min,
            logical_max,
            is_signed,
            is_padding,
        })?;
    }

    Ok(())
}

pub mod parse {
    use nom::IResult;
    use nom::bytes::streaming::take;
    use nom::number::streaming::u8;

    /// Lead byte marking a long item. Long items are not supported; the builder
    /// rejects descriptors containing one.
    pub const LONG_ITEM_PREFIX: u8 = 0b1111_1110;

    // Main item tags
    pub const TAG_INPUT: u8 = 0b1000;
    pub const TAG_OUTPUT: u8 = 0b1001;
    pub const TAG_COLLECTION: u8 = 0b1010;
    pub const TAG_FEATURE: u8 = 0b1011;
    pub const TAG_END_COLLECTION: u8 = 0b1100;

    // Global item tags
    pub const TAG_USAGE_PAGE: u8 = 0b0000;
    pub const TAG_LOGICAL_MINIMUM: u8 = 0b0001;
    pub const TAG_LOGICAL_MAXIMUM: u8 = 0b0010;
    pub const TAG_REPORT_SIZE: u8 = 0b0111;
    pub const TAG_REPORT_ID: u8 = 0b1000;
    pub const TAG_REPORT_COUNT: u8 = 0b1001;

    // Local item tags
    pub const TAG_USAGE: u8 = 0b0000;
    pub const TAG_USAGE_MINIMUM: u8 = 0b0001;
    pub const TAG_USAGE_MAXIMUM: u8 = 0b0010;

    /// Category of a short item, from the bType bits of its lead byte.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub enum ItemClass {
        Main,
        Global,
        Local,
        Reserved,
    }

    /// One decoded short item: a lead byte followed by 0, 1, 2 or 4 data bytes.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ShortItem {
        prefix: u8,
        value: u32,
    }

    impl ShortItem {
        pub fn class(&self) -> ItemClass {
            match (self.prefix >> 2) & 0b11 {
                0b00 => ItemClass::Main,
                0b01 => ItemClass::Global,
                0b10 => ItemClass::Local,
                _ => ItemClass::Reserved,
            }
        }

        /// The bTag bits (upper nibble of the lead byte).
        pub fn tag(&self) -> u8 {
            self.prefix >> 4
        }

        /// Number of data bytes following the lead byte.
        pub fn size(&self) -> usize {
            match self.prefix & 0b11 {
                0 => 0,
                1 => 1,
                2 => 2,
                _ => 4,
            }
        }

        /// Payload, zero-extended.
        pub fn value(&self) -> u32 {
            self.value
        }

        /// Payload, sign-extended according to its encoded size.
        pub fn signed_value(&self) -> i32 {
            match self.size() {
                0 => 0,
                1 => self.value as u8 as i8 as i32,
                2 => self.value as u16 as i16 as i32,
                _ => self.value as i32,
            }
        }
    }

    /// Parse one short item off the front of a descriptor.
    pub fn short_item(input: &[u8]) -> IResult<&[u8], ShortItem> {
        let (input, prefix) = u8(input)?;
        let size = match prefix & 0b11 {
            0 => 0usize,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        let (input, data) = take(size)(input)?;
        let mut value = 0u32;
        for (i, byte) in data.iter().enumerate() {
            value |= (*byte as u32) << (8 * i);
        }
        Ok((input, ShortItem { prefix, value }))
    }

}
