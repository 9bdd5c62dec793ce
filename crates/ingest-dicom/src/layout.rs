//! DICOMDIR字节布局扫描
//!
//! 目录记录之间通过文件内字节偏移互相引用，而内存对象不保留偏移，
//! 这里直接扫描显式VR小端编码的文件，记录每个目录记录条目的起始偏移。

/// 目录记录序列 (0004,1220)
const DIRECTORY_RECORD_SEQUENCE: (u16, u16) = (0x0004, 0x1220);
const ITEM: (u16, u16) = (0xFFFE, 0xE000);
const ITEM_DELIMITATION: (u16, u16) = (0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION: (u16, u16) = (0xFFFE, 0xE0DD);
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// 使用4字节长度字段的VR
const LONG_LENGTH_VRS: [&[u8; 2]; 13] = [
    b"OB", b"OD", b"OF", b"OL", b"OV", b"OW", b"SQ", b"UC", b"UN", b"UR", b"UT", b"SV", b"UV",
];

#[derive(Debug, Clone, Copy)]
struct ElementHeader {
    tag: (u16, u16),
    vr: [u8; 2],
    length: u32,
}

struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn read_u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.take(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn element_header(&mut self) -> Option<ElementHeader> {
        let group = self.read_u16()?;
        let element = self.read_u16()?;

        // 条目与分隔符没有VR字段
        if group == 0xFFFE {
            let length = self.read_u32()?;
            return Some(ElementHeader {
                tag: (group, element),
                vr: *b"  ",
                length,
            });
        }

        let vr_bytes = self.take(2)?;
        let vr = [vr_bytes[0], vr_bytes[1]];
        let length = if LONG_LENGTH_VRS.iter().any(|long| **long == vr) {
            self.take(2)?;
            self.read_u32()?
        } else {
            u32::from(self.read_u16()?)
        };

        Some(ElementHeader {
            tag: (group, element),
            vr,
            length,
        })
    }

    fn skip_value(&mut self, header: &ElementHeader) -> Option<()> {
        if header.length == UNDEFINED_LENGTH {
            return self.skip_undefined_sequence();
        }
        self.take(header.length as usize).map(|_| ())
    }

    fn skip_undefined_sequence(&mut self) -> Option<()> {
        loop {
            let header = self.element_header()?;
            match header.tag {
                ITEM => self.skip_item(&header)?,
                SEQUENCE_DELIMITATION => return Some(()),
                _ => return None,
            }
        }
    }

    fn skip_item(&mut self, header: &ElementHeader) -> Option<()> {
        if header.length != UNDEFINED_LENGTH {
            return self.take(header.length as usize).map(|_| ());
        }
        loop {
            let inner = self.element_header()?;
            if inner.tag == ITEM_DELIMITATION {
                return Some(());
            }
            self.skip_value(&inner)?;
        }
    }

    fn item_offsets(&mut self, length: u32) -> Option<Vec<u32>> {
        let end = if length == UNDEFINED_LENGTH {
            None
        } else {
            Some(self.pos.checked_add(length as usize)?)
        };

        let mut offsets = Vec::new();
        loop {
            if end.is_some_and(|end| self.pos >= end) {
                break;
            }
            let start = self.pos;
            let header = self.element_header()?;
            match header.tag {
                ITEM => {
                    offsets.push(u32::try_from(start).ok()?);
                    self.skip_item(&header)?;
                }
                SEQUENCE_DELIMITATION => break,
                _ => return None,
            }
        }
        Some(offsets)
    }
}

/// 扫描DICOMDIR文件中每个目录记录的起始字节偏移
///
/// 仅支持显式VR小端编码；遇到无法识别的结构时返回 None。
pub fn scan_record_offsets(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.len() < 132 || &bytes[128..132] != b"DICM" {
        return None;
    }

    let mut cursor = ByteCursor::new(bytes, 132);
    loop {
        let header = cursor.element_header()?;
        if header.tag == DIRECTORY_RECORD_SEQUENCE {
            if &header.vr != b"SQ" {
                return None;
            }
            return cursor.item_offsets(header.length);
        }
        cursor.skip_value(&header)?;
    }
}
