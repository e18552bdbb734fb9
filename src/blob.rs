//! Decoding of the `ZDATA` note blob: gzip wrapper, protobuf walk, attribute
//! runs, inline table references. The encode path is the exact inverse and is
//! what the create-note path writes back to the store.

use crate::error::{Error, Result};
use crate::model::{AttributeRun, StyleTag, StyledDocument, TABLE_UTI, TableRef};
use crate::wire::{Cursor, WireType, Writer};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::GzEncoder;
use flate2::{Decompress, FlushDecompress};
use std::io::{Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decode a raw `ZDATA` blob into a styled document with unresolved table
/// references. The input may be gzip-wrapped or bare protobuf (older records).
pub fn decode(data: &[u8]) -> Result<StyledDocument> {
    let payload = unwrap_gzip(data)?;
    decode_protobuf(&payload)
}

/// Strip the gzip wrapper if present, returning the inner payload.
///
/// Apple writes a plain 10-byte header most of the time, but FEXTRA/FNAME/
/// FCOMMENT/FHCRC have all been observed in synced stores, so the optional
/// sections are skipped per the flag bits rather than assumed absent.
pub fn unwrap_gzip(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 2 || data[..2] != GZIP_MAGIC {
        return Ok(data.to_vec());
    }
    if data.len() < 18 {
        return Err(Error::DecodeFailed("decompression"));
    }
    if data[2] != 8 {
        // Only deflate (CM=8) exists in practice.
        return Err(Error::DecodeFailed("decompression"));
    }
    let flags = data[3];
    let mut pos = 10usize;

    // FEXTRA: little-endian length prefix.
    if flags & 0x04 != 0 {
        if pos + 2 > data.len() {
            return Err(Error::DecodeFailed("decompression"));
        }
        let extra = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2 + extra;
    }
    // FNAME, FCOMMENT: NUL-terminated.
    for flag in [0x08u8, 0x10] {
        if flags & flag != 0 {
            let rest = data
                .get(pos..)
                .ok_or(Error::DecodeFailed("decompression"))?;
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(Error::DecodeFailed("decompression"))?;
            pos += nul + 1;
        }
    }
    // FHCRC: two bytes of header CRC.
    if flags & 0x02 != 0 {
        pos += 2;
    }
    if pos + 8 > data.len() {
        return Err(Error::DecodeFailed("decompression"));
    }

    // The deflate stream sits between the header and the 8-byte trailer.
    let window = &data[pos..data.len() - 8];
    let mut out = Vec::new();
    let mut decoder = DeflateDecoder::new(window);
    if decoder.read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    inflate_one_shot(window)
}

/// Fallback for streams the incremental decoder rejects.
fn inflate_one_shot(window: &[u8]) -> Result<Vec<u8>> {
    let mut inflater = Decompress::new(false);
    let mut out = Vec::with_capacity(window.len().saturating_mul(4).max(4096));
    loop {
        let consumed = inflater.total_in() as usize;
        let produced = out.len();
        let status = inflater
            .decompress_vec(&window[consumed..], &mut out, FlushDecompress::Finish)
            .map_err(|_| Error::DecodeFailed("decompression"))?;
        if matches!(status, flate2::Status::StreamEnd) {
            return Ok(out);
        }
        if inflater.total_in() as usize == consumed && out.len() == produced {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(4096));
            } else {
                // No forward progress and room to spare: truncated stream.
                return Err(Error::DecodeFailed("decompression"));
            }
        }
    }
}

fn decode_protobuf(payload: &[u8]) -> Result<StyledDocument> {
    let mut text = String::new();
    let mut runs: Vec<AttributeRun> = Vec::new();
    let mut table_refs: Vec<TableRef> = Vec::new();

    // NoteStoreProto → field 2 (document) → field 3 (note).
    let mut root = Cursor::new(payload);
    while let Some((field, wire)) = root.read_tag()? {
        if field == 2 && wire == WireType::LengthDelimited {
            let document = root.read_length_delimited()?;
            let mut doc = Cursor::new(document);
            while let Some((field, wire)) = doc.read_tag()? {
                if field == 3 && wire == WireType::LengthDelimited {
                    let note = doc.read_length_delimited()?;
                    parse_note(note, &mut text, &mut runs, &mut table_refs)?;
                } else {
                    doc.skip_field(wire)?;
                }
            }
        } else {
            root.skip_field(wire)?;
        }
    }

    Ok(StyledDocument {
        text,
        runs,
        tables: Vec::new(),
        table_refs,
    })
}

fn parse_note(
    note: &[u8],
    text: &mut String,
    runs: &mut Vec<AttributeRun>,
    table_refs: &mut Vec<TableRef>,
) -> Result<()> {
    let mut cur = Cursor::new(note);
    let mut offset: usize = runs.iter().map(|r| r.length).sum();
    while let Some((field, wire)) = cur.read_tag()? {
        match (field, wire) {
            (2, WireType::LengthDelimited) => {
                let bytes = cur.read_length_delimited()?;
                *text = String::from_utf8(bytes.to_vec())
                    .map_err(|_| Error::DecodeFailed("text encoding"))?;
            }
            (5, WireType::LengthDelimited) => {
                let bytes = cur.read_length_delimited()?;
                let (run, object) = parse_attribute_run(bytes)?;
                if let Some((uuid, type_uti)) = object
                    && type_uti == TABLE_UTI
                {
                    table_refs.push(TableRef {
                        uuid,
                        type_uti,
                        position: offset,
                    });
                }
                offset += run.length;
                runs.push(run);
            }
            _ => cur.skip_field(wire)?,
        }
    }
    Ok(())
}

type EmbeddedObject = Option<(String, String)>;

fn parse_attribute_run(bytes: &[u8]) -> Result<(AttributeRun, EmbeddedObject)> {
    let mut run = AttributeRun::plain(0, StyleTag::Body);
    let mut object = None;

    let mut cur = Cursor::new(bytes);
    while let Some((field, wire)) = cur.read_tag()? {
        match (field, wire) {
            (1, WireType::Varint) => {
                run.length = cur.read_varint()? as usize;
            }
            (2, WireType::LengthDelimited) => {
                let style = cur.read_length_delimited()?;
                run.style = StyleTag::from_wire(parse_paragraph_style(style)?);
            }
            (3, WireType::LengthDelimited) => {
                let font = cur.read_length_delimited()?;
                parse_font_info(font, &mut run);
            }
            (5, WireType::Varint) => {
                run.font_weight = Some(cur.read_varint()?);
            }
            (12, WireType::LengthDelimited) => {
                let obj = cur.read_length_delimited()?;
                object = parse_embedded_object(obj)?;
            }
            _ => cur.skip_field(wire)?,
        }
    }
    Ok((run, object))
}

/// Returns the `style_type` payload, or `None` when the field is absent
/// (which is how Body paragraphs are written).
fn parse_paragraph_style(bytes: &[u8]) -> Result<Option<u64>> {
    let mut style_type = None;
    let mut cur = Cursor::new(bytes);
    while let Some((field, wire)) = cur.read_tag()? {
        if field == 1 && wire == WireType::Varint {
            style_type = Some(cur.read_varint()?);
        } else {
            cur.skip_field(wire)?;
        }
    }
    Ok(style_type)
}

/// Field 3 is either a proper font message (name at field 1, f32 size at
/// field 2) or, in some legacy records, a bare font-name string. The bare
/// form is recognised by a leading newline byte or an embedded `-`.
fn parse_font_info(bytes: &[u8], run: &mut AttributeRun) {
    let parsed = (|| -> Result<(Option<String>, Option<f32>)> {
        let mut name = None;
        let mut size = None;
        let mut cur = Cursor::new(bytes);
        while let Some((field, wire)) = cur.read_tag()? {
            match (field, wire) {
                (1, WireType::LengthDelimited) => {
                    let raw = cur.read_length_delimited()?;
                    name = std::str::from_utf8(raw).ok().map(str::to_string);
                }
                (2, WireType::Fixed32) => {
                    size = Some(f32::from_bits(cur.read_fixed32()?));
                }
                _ => cur.skip_field(wire)?,
            }
        }
        Ok((name, size))
    })();

    match parsed {
        Ok((name, size)) => {
            run.font_name = name;
            run.font_size = size;
        }
        Err(_) => {
            if let Ok(s) = std::str::from_utf8(bytes)
                && (s.starts_with('\n') || s.contains('-'))
            {
                run.font_name = Some(s.trim_start_matches('\n').to_string());
            }
        }
    }
}

fn parse_embedded_object(bytes: &[u8]) -> Result<EmbeddedObject> {
    let mut uuid = None;
    let mut type_uti = None;
    let mut cur = Cursor::new(bytes);
    while let Some((field, wire)) = cur.read_tag()? {
        match (field, wire) {
            (1, WireType::LengthDelimited) => {
                let raw = cur.read_length_delimited()?;
                uuid = std::str::from_utf8(raw).ok().map(str::to_string);
            }
            (2, WireType::LengthDelimited) => {
                let raw = cur.read_length_delimited()?;
                type_uti = std::str::from_utf8(raw).ok().map(str::to_string);
            }
            _ => cur.skip_field(wire)?,
        }
    }
    Ok(match (uuid, type_uti) {
        (Some(u), Some(t)) => Some((u, t)),
        _ => None,
    })
}

/// Encode text + runs into a store-ready gzipped blob.
pub fn encode(text: &str, runs: &[AttributeRun]) -> Result<Vec<u8>> {
    let payload = encode_protobuf(text, runs);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&payload)
        .and_then(|_| encoder.finish())
        .map_err(|_| Error::DecodeFailed("compression"))
}

/// The bare protobuf payload (pre-gzip); exposed for wire-level tests.
pub fn encode_protobuf(text: &str, runs: &[AttributeRun]) -> Vec<u8> {
    let mut root = Writer::new();
    root.message_field(2, |document| {
        document.message_field(3, |note| {
            note.string_field(2, text);
            for run in runs {
                note.message_field(5, |r| {
                    r.varint_field(1, run.length as u64);
                    // Body is the absence of the style field; never write a zero.
                    if let Some(style) = run.style.to_wire() {
                        r.message_field(2, |s| {
                            s.varint_field(1, style);
                        });
                    }
                    if let Some(weight) = run.font_weight {
                        r.varint_field(5, weight);
                    }
                });
            }
        });
    });
    root.into_bytes()
}

/// Pairs each run with the text slice it covers, for inspection and tests.
/// Run lengths are code points; the slice lookup converts to byte offsets.
pub fn dump_runs(doc: &StyledDocument) -> Vec<(AttributeRun, String)> {
    let byte_offsets: Vec<usize> = doc
        .text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(doc.text.len()))
        .collect();
    let total_chars = byte_offsets.len() - 1;

    let mut out = Vec::with_capacity(doc.runs.len());
    let mut cp = 0usize;
    for run in &doc.runs {
        let start = cp.min(total_chars);
        let end = (cp + run.length).min(total_chars);
        let slice = doc.text[byte_offsets[start]..byte_offsets[end]].to_string();
        out.push((run.clone(), slice));
        cp += run.length;
    }
    out
}
