//! A minimal BER-TLV codec: multi-byte tags, short- and long-form lengths,
//! and a recursive tree model for constructed values.
//!
//! This is deliberately hand-rolled rather than parsed opaquely, so that
//! callers can walk a `SELECT` FCI or a GET STATUS registry response by tag
//! path without re-deriving BER framing rules each time.

/// One decoded tag-length-value node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// Raw tag bytes, in encoding order.
    pub tag: Vec<u8>,
    /// The declared length.
    pub length: usize,
    /// Either the primitive value bytes, or, for constructed tags, the
    /// parsed children.
    pub value: Value,
}

/// The payload of a [`Tlv`] node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A primitive value: raw bytes.
    Primitive(Vec<u8>),
    /// A constructed value: nested TLVs.
    Constructed(Vec<Tlv>),
}

impl Tlv {
    /// Uppercase hex rendering of the tag, e.g. `"9F70"`.
    pub fn tag_hex(&self) -> String {
        hex_upper(&self.tag)
    }

    /// `true` if bit 6 of the first tag byte (the constructed bit) was set.
    pub fn is_constructed(&self) -> bool {
        self.tag.first().is_some_and(|b| b & 0x20 != 0)
    }

    /// Primitive bytes, if this node is not constructed.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Value::Primitive(bytes) => Some(bytes),
            Value::Constructed(_) => None,
        }
    }

    /// Children, if this node is constructed.
    pub fn children(&self) -> &[Tlv] {
        match &self.value {
            Value::Primitive(_) => &[],
            Value::Constructed(children) => children,
        }
    }
}

/// Errors produced while decoding a BER-TLV stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    /// The input ended in the middle of a tag, length, or value.
    #[error("truncated TLV data")]
    Truncated,
    /// A long-form length declared more bytes than `usize` can represent
    /// in practice (more than 4 length-of-length bytes).
    #[error("length field too large")]
    LengthOverflow,
}

/// Parse a complete BER-TLV stream (zero or more top-level tags).
pub fn parse(bytes: &[u8]) -> Result<Vec<Tlv>, TlvError> {
    let mut nodes = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (node, consumed) = parse_one(&bytes[offset..])?;
        nodes.push(node);
        offset += consumed;
    }
    Ok(nodes)
}

fn parse_one(bytes: &[u8]) -> Result<(Tlv, usize), TlvError> {
    let (tag, tag_len) = parse_tag(bytes)?;
    let after_tag = &bytes[tag_len..];
    let (length, len_len) = parse_length(after_tag)?;
    let after_len = &after_tag[len_len..];
    if after_len.len() < length {
        return Err(TlvError::Truncated);
    }
    let value_bytes = &after_len[..length];

    let constructed = tag.first().is_some_and(|b| b & 0x20 != 0);
    let value = if constructed {
        Value::Constructed(parse(value_bytes)?)
    } else {
        Value::Primitive(value_bytes.to_vec())
    };

    let total = tag_len + len_len + length;
    Ok((Tlv { tag, length, value }, total))
}

fn parse_tag(bytes: &[u8]) -> Result<(Vec<u8>, usize), TlvError> {
    let first = *bytes.first().ok_or(TlvError::Truncated)?;
    let mut tag = vec![first];
    // Low five bits all set: tag continues into subsequent bytes.
    if first & 0x1F == 0x1F {
        let mut idx = 1;
        loop {
            let byte = *bytes.get(idx).ok_or(TlvError::Truncated)?;
            tag.push(byte);
            idx += 1;
            // Continuation stops at the first byte with the high bit clear.
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok((tag, idx))
    } else {
        Ok((tag, 1))
    }
}

fn parse_length(bytes: &[u8]) -> Result<(usize, usize), TlvError> {
    let first = *bytes.first().ok_or(TlvError::Truncated)?;
    if first & 0x80 == 0 {
        Ok((first as usize, 1))
    } else {
        let num_bytes = (first & 0x7F) as usize;
        if num_bytes == 0 || num_bytes > size_of::<usize>() {
            return Err(TlvError::LengthOverflow);
        }
        let rest = bytes.get(1..1 + num_bytes).ok_or(TlvError::Truncated)?;
        let mut length = 0usize;
        for byte in rest {
            length = (length << 8) | *byte as usize;
        }
        Ok((length, 1 + num_bytes))
    }
}

fn size_of<T>() -> usize {
    core::mem::size_of::<T>()
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Depth-first search for every node reachable by descending `tag_path`
/// (each element matched against raw tag bytes at the corresponding depth).
///
/// Unlike a strict single-level lookup, this also searches *into* every
/// node along the way: if `tag_path[0]` occurs at several different depths,
/// every matching descent is explored.
pub fn find_all<'a>(tree: &'a [Tlv], tag_path: &[&[u8]]) -> Vec<&'a Tlv> {
    let Some((head, rest)) = tag_path.split_first() else {
        return Vec::new();
    };

    let mut matches = Vec::new();
    for node in tree {
        if node.tag == *head {
            if rest.is_empty() {
                matches.push(node);
            } else {
                matches.extend(find_all(node.children(), rest));
            }
        }
        // Also search deeper in case the path begins further down the tree.
        matches.extend(find_all(node.children(), tag_path));
    }
    matches
}

/// Find every node anywhere in `tree` with the given single `tag`.
pub fn find_all_tag<'a>(tree: &'a [Tlv], tag: &[u8]) -> Vec<&'a Tlv> {
    let mut matches = Vec::new();
    for node in tree {
        if node.tag == tag {
            matches.push(node);
        }
        matches.extend(find_all_tag(node.children(), tag));
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_form_length() {
        let nodes = parse(&[0x4F, 0x02, 0xAA, 0xBB]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].tag_hex(), "4F");
        assert_eq!(nodes[0].as_bytes(), Some(&[0xAA, 0xBB][..]));
    }

    #[test]
    fn parses_long_form_length() {
        let mut data = vec![0x53, 0x81, 0x02];
        data.extend_from_slice(&[0x01, 0x02]);
        let nodes = parse(&data).unwrap();
        assert_eq!(nodes[0].length, 2);
    }

    #[test]
    fn parses_multi_byte_tag() {
        // 9F 70: first byte low 5 bits = 0x1F -> continuation; next byte
        // high bit clear -> tag ends there.
        let nodes = parse(&[0x9F, 0x70, 0x01, 0x07]).unwrap();
        assert_eq!(nodes[0].tag, vec![0x9F, 0x70]);
        assert_eq!(nodes[0].tag_hex(), "9F70");
    }

    #[test]
    fn parses_constructed_and_descends() {
        // E3 (constructed) containing 4F 01 AA
        let nodes = parse(&[0xE3, 0x03, 0x4F, 0x01, 0xAA]).unwrap();
        assert!(nodes[0].is_constructed());
        let found = find_all(&nodes, &[&[0xE3], &[0x4F]]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].as_bytes(), Some(&[0xAA][..]));
    }

    #[test]
    fn find_all_tag_searches_every_depth() {
        let nodes = parse(&[0xE3, 0x05, 0xE3, 0x03, 0x4F, 0x01, 0xAA]).unwrap();
        let found = find_all_tag(&nodes, &[0x4F]);
        assert_eq!(found.len(), 1);
    }
}
